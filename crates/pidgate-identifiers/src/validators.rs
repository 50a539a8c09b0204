//! Boolean checks over raw identifier strings

use crate::extractors::{parse_doi, parse_handle, parse_url};
use crate::pid::{Pid, PidKind};

/// Check whether a string is any kind of PID
pub fn is_pid(raw: &str) -> bool {
    Pid::classify(raw).is_some()
}

/// Check whether a string matches the DOI grammar
pub fn is_valid_doi(raw: &str) -> bool {
    parse_doi(raw.trim()).is_some()
}

/// Check whether a string matches the Handle grammar
pub fn is_valid_handle(raw: &str) -> bool {
    parse_handle(raw.trim()).is_some()
}

/// Check whether a string is an absolute URL with a network location
pub fn is_valid_url(raw: &str) -> bool {
    parse_url(raw.trim()).is_some()
}

/// Kind a string classifies as, if any
pub fn pid_kind(raw: &str) -> Option<PidKind> {
    Pid::classify(raw).map(|pid| pid.kind())
}
