//! IMAP sequence-string codec for compact UID set persistence.
//!
//! Large tracked UID sets are persisted as RFC 3501 style sequence strings:
//! ascending runs of consecutive UIDs collapse to `first:last`, isolated
//! values stay as comma-separated singletons, e.g. `{1,2,3,5,7,8,9}`
//! encodes to `"1:3,5,7:9"`.

use std::collections::BTreeSet;
use std::fmt::Write;

use crate::error::{Result, StaleState};
use crate::types::Uid;

/// Tracked UID sets larger than this are persisted range-compressed
/// instead of as a plain list.
pub const UID_COMPRESSION_THRESHOLD: usize = 500;

/// Encode a UID set as a sequence string. Input order does not matter;
/// the output is always ascending.
pub fn to_sequence_string<I>(uids: I) -> String
where
    I: IntoIterator<Item = Uid>,
{
    let sorted: BTreeSet<Uid> = uids.into_iter().collect();

    let mut out = String::new();
    let mut run: Option<(Uid, Uid)> = None;
    for uid in sorted {
        run = match run {
            Some((start, end)) if uid == end + 1 => Some((start, uid)),
            Some((start, end)) => {
                push_run(&mut out, start, end);
                Some((uid, uid))
            }
            None => Some((uid, uid)),
        };
    }
    if let Some((start, end)) = run {
        push_run(&mut out, start, end);
    }

    out
}

fn push_run(out: &mut String, start: Uid, end: Uid) {
    if !out.is_empty() {
        out.push(',');
    }
    if start == end {
        let _ = write!(out, "{start}");
    } else {
        let _ = write!(out, "{start}:{end}");
    }
}

/// Expand a sequence string back to the full UID set.
///
/// Malformed input means the persisted blob cannot be trusted and is
/// reported as a stale-state condition.
pub fn parse_sequence_string(input: &str) -> Result<BTreeSet<Uid>> {
    let mut uids = BTreeSet::new();
    if input.is_empty() {
        return Ok(uids);
    }

    for part in input.split(',') {
        match part.split_once(':') {
            Some((first, last)) => {
                let start = parse_uid(first)?;
                let end = parse_uid(last)?;
                if start > end {
                    return Err(StaleState::Corrupt(format!(
                        "descending uid range {part:?} in sequence string"
                    ))
                    .into());
                }
                uids.extend(start..=end);
            }
            None => {
                uids.insert(parse_uid(part)?);
            }
        }
    }

    Ok(uids)
}

fn parse_uid(token: &str) -> Result<Uid> {
    token
        .parse()
        .map_err(|_| StaleState::Corrupt(format!("invalid uid {token:?} in sequence string")).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_runs_and_singletons() {
        let uids = [1, 2, 3, 5, 7, 8, 9];
        assert_eq!(to_sequence_string(uids), "1:3,5,7:9");
    }

    #[test]
    fn test_compress_unordered_input() {
        let uids = [9, 1, 8, 3, 5, 2, 7];
        assert_eq!(to_sequence_string(uids), "1:3,5,7:9");
    }

    #[test]
    fn test_parse_expands_ranges() {
        let uids = parse_sequence_string("1:3,5,7:9").unwrap();
        assert_eq!(uids, BTreeSet::from([1, 2, 3, 5, 7, 8, 9]));
    }

    #[test]
    fn test_roundtrip_exact() {
        let original: BTreeSet<Uid> = (1..=600).filter(|uid| uid % 97 != 0).collect();
        let encoded = to_sequence_string(original.iter().copied());
        assert_eq!(parse_sequence_string(&encoded).unwrap(), original);
    }

    #[test]
    fn test_empty_string_is_empty_set() {
        assert!(parse_sequence_string("").unwrap().is_empty());
        assert_eq!(to_sequence_string([]), "");
    }

    #[test]
    fn test_malformed_input_is_stale() {
        assert!(parse_sequence_string("1:x").unwrap_err().is_stale_state());
        assert!(parse_sequence_string("abc").unwrap_err().is_stale_state());
        assert!(parse_sequence_string("9:1").unwrap_err().is_stale_state());
    }
}
