//! Console output markers recognized from the external tool.
//!
//! The tool has no machine-readable output, so sessions are driven by
//! matching known substrings in its console stream. The table is explicit
//! and versioned so a tool update that changes wording is a one-place fix.

use serde::Serialize;

/// Bumped whenever a marker string is added, removed or reworded.
pub const MARKER_TABLE_VERSION: u32 = 4;

/// What a matched marker means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleEvent {
    /// The interactive prompt is ready for a command.
    Prompt,
    LoginSucceeded,
    /// The tool asks for an authenticator code.
    SecondFactorRequired,
    /// The tool asks for an emailed guard code.
    EmailCodeRequired,
    /// The tool waits for an approval in the mobile app.
    MobileConfirmation,
    BadCredentials,
    RateLimited,
    InvalidSecondFactor,
    BuildSucceeded,
    BuildFailed,
    DownloadSucceeded,
    DownloadFailed,
    Progress,
}

impl ConsoleEvent {
    pub fn is_login_outcome(&self) -> bool {
        matches!(
            self,
            ConsoleEvent::LoginSucceeded
                | ConsoleEvent::SecondFactorRequired
                | ConsoleEvent::EmailCodeRequired
                | ConsoleEvent::MobileConfirmation
                | ConsoleEvent::BadCredentials
                | ConsoleEvent::RateLimited
                | ConsoleEvent::InvalidSecondFactor
        )
    }
}

/// One recognized substring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub pattern: &'static str,
    pub event: ConsoleEvent,
    /// The rest of the line carries a diagnostic, so the match waits for the
    /// line to be complete before it is reported.
    pub whole_line: bool,
    /// Generic marker that yields to any other marker on the same line.
    pub fallback: bool,
}

impl Marker {
    pub const fn new(pattern: &'static str, event: ConsoleEvent) -> Self {
        Self {
            pattern,
            event,
            whole_line: false,
            fallback: false,
        }
    }

    pub const fn line(pattern: &'static str, event: ConsoleEvent) -> Self {
        Self {
            pattern,
            event,
            whole_line: true,
            fallback: false,
        }
    }

    /// A whole-line marker for the generic form of a failure, such as
    /// `FAILED login with result code <cause>`.
    pub const fn fallback(pattern: &'static str, event: ConsoleEvent) -> Self {
        Self {
            pattern,
            event,
            whole_line: true,
            fallback: true,
        }
    }
}

const STEAMCMD_MARKERS: &[Marker] = &[
    Marker::new("Steam>", ConsoleEvent::Prompt),
    Marker::new("Waiting for user info...OK", ConsoleEvent::LoginSucceeded),
    Marker::new("Logged in OK", ConsoleEvent::LoginSucceeded),
    Marker::new("Two-factor code:", ConsoleEvent::SecondFactorRequired),
    Marker::new("Steam Guard code:", ConsoleEvent::EmailCodeRequired),
    Marker::new(
        "This account is protected by a Steam Guard mobile authenticator",
        ConsoleEvent::MobileConfirmation,
    ),
    Marker::new(
        "Please confirm the login in the Steam Mobile app",
        ConsoleEvent::MobileConfirmation,
    ),
    Marker::line("Invalid Password", ConsoleEvent::BadCredentials),
    Marker::fallback("FAILED login", ConsoleEvent::BadCredentials),
    Marker::line("Rate Limit Exceeded", ConsoleEvent::RateLimited),
    Marker::line("Two-factor code mismatch", ConsoleEvent::InvalidSecondFactor),
    Marker::line("Invalid Login Auth Code", ConsoleEvent::InvalidSecondFactor),
    Marker::line("Successfully finished AppID", ConsoleEvent::BuildSucceeded),
    Marker::line("ERROR! Failed to", ConsoleEvent::BuildFailed),
    Marker::line("ERROR! Not logged on", ConsoleEvent::BuildFailed),
    Marker::line("Depot download complete :", ConsoleEvent::DownloadSucceeded),
    Marker::line("Depot download failed :", ConsoleEvent::DownloadFailed),
    Marker::line("Building depot", ConsoleEvent::Progress),
    Marker::line("Uploading content", ConsoleEvent::Progress),
    Marker::line("Downloading depot", ConsoleEvent::Progress),
];

/// The complete set of markers known for one tool version.
#[derive(Debug, Clone)]
pub struct MarkerTable {
    markers: Vec<Marker>,
}

impl Default for MarkerTable {
    fn default() -> Self {
        Self::steamcmd()
    }
}

impl MarkerTable {
    pub fn steamcmd() -> Self {
        Self {
            markers: STEAMCMD_MARKERS.to_vec(),
        }
    }

    pub fn new(markers: Vec<Marker>) -> Self {
        Self { markers }
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// The subset of markers for the given events, in table order.
    pub fn select(&self, events: &[ConsoleEvent]) -> Vec<Marker> {
        self.markers
            .iter()
            .filter(|m| events.contains(&m.event))
            .cloned()
            .collect()
    }
}

/// A marker found in console output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerMatch {
    pub event: ConsoleEvent,
    pub pattern: &'static str,
    /// Byte offset of the marker within the searched text.
    pub start: usize,
    /// Byte offset just past the consumed text.
    pub end: usize,
    /// The full line containing the marker, without the line terminator.
    pub line: String,
    /// Text after the marker up to the end of the line, trimmed.
    pub suffix: String,
}

/// Finds the earliest marker in `text`.
///
/// Ties at the same offset go to the longer pattern. A fallback marker is
/// only reported when no other marker appears later on its line, so
/// `FAILED login with result code Rate Limit Exceeded` reads as the rate
/// limit. A `whole_line` marker whose line is not yet terminated blocks the
/// search until more output arrives, unless `closed` says no more output
/// will come.
pub fn find_first(markers: &[Marker], text: &str, closed: bool) -> Option<MarkerMatch> {
    let (mut start, mut marker) = earliest(markers.iter(), text)?;
    if marker.fallback {
        let line_limit = text[start..].find('\n').map_or(text.len(), |i| start + i);
        let specific = markers.iter().filter(|m| !m.fallback);
        if let Some((offset, found)) = earliest(specific, &text[start..line_limit]) {
            start += offset;
            marker = found;
        }
    }

    let pattern_end = start + marker.pattern.len();
    let line_start = text[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let newline = text[pattern_end..].find('\n').map(|i| pattern_end + i);

    let (line_end, end) = match (marker.whole_line, newline) {
        (true, Some(nl)) => (nl, nl + 1),
        (true, None) if closed => (text.len(), text.len()),
        (true, None) => return None,
        (false, Some(nl)) => (nl, pattern_end),
        (false, None) => (text.len(), pattern_end),
    };

    let line = text[line_start..line_end].trim_end_matches('\r').to_string();
    let suffix = text[pattern_end..line_end].trim().to_string();

    Some(MarkerMatch {
        event: marker.event,
        pattern: marker.pattern,
        start,
        end,
        line,
        suffix,
    })
}

fn earliest<'m>(
    markers: impl Iterator<Item = &'m Marker>,
    text: &str,
) -> Option<(usize, &'m Marker)> {
    let mut best: Option<(usize, &Marker)> = None;
    for marker in markers {
        if let Some(pos) = text.find(marker.pattern) {
            let better = match best {
                None => true,
                Some((best_pos, best_marker)) => {
                    pos < best_pos
                        || (pos == best_pos && marker.pattern.len() > best_marker.pattern.len())
                }
            };
            if better {
                best = Some((pos, marker));
            }
        }
    }
    best
}

/// Parses `... (BuildID 12345)` from a build success line.
pub fn parse_build_id(line: &str) -> Option<u64> {
    let start = line.find("BuildID")? + "BuildID".len();
    let digits: String = line[start..]
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Parses the quoted path from a `Depot download complete : "<path>"` line.
pub fn parse_quoted_path(suffix: &str) -> Option<String> {
    let open = suffix.find('"')?;
    let rest = &suffix[open + 1..];
    let close = rest.find('"')?;
    let path = &rest[..close];
    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login_markers() -> Vec<Marker> {
        MarkerTable::steamcmd().select(&[
            ConsoleEvent::LoginSucceeded,
            ConsoleEvent::SecondFactorRequired,
            ConsoleEvent::BadCredentials,
            ConsoleEvent::InvalidSecondFactor,
        ])
    }

    #[test]
    fn test_earliest_marker_wins() {
        let text = "Logging in user 'x' to Steam Public...\nTwo-factor code mismatch\nTwo-factor code:";
        let m = find_first(&login_markers(), text, false).unwrap();
        assert_eq!(m.event, ConsoleEvent::InvalidSecondFactor);
        assert_eq!(m.line, "Two-factor code mismatch");

        let rest = &text[m.end..];
        let m = find_first(&login_markers(), rest, false).unwrap();
        assert_eq!(m.event, ConsoleEvent::SecondFactorRequired);
    }

    #[test]
    fn test_whole_line_marker_waits_for_newline() {
        let markers = MarkerTable::steamcmd().select(&[ConsoleEvent::BuildFailed]);
        let partial = "ERROR! Failed to commit build for AppID 480 : Invalid def";
        assert!(find_first(&markers, partial, false).is_none());

        let full = "ERROR! Failed to commit build for AppID 480 : Invalid default manifest\r\n";
        let m = find_first(&markers, full, false).unwrap();
        assert_eq!(m.suffix, "commit build for AppID 480 : Invalid default manifest");
        assert_eq!(m.end, full.len());

        let m = find_first(&markers, partial, true).unwrap();
        assert!(m.line.ends_with("Invalid def"));
    }

    #[test]
    fn test_specific_cause_beats_generic_failure_on_same_line() {
        let markers = MarkerTable::steamcmd().select(&[
            ConsoleEvent::BadCredentials,
            ConsoleEvent::RateLimited,
            ConsoleEvent::InvalidSecondFactor,
        ]);

        let text = "Logging in user 'x' to Steam Public...FAILED login with result code Rate Limit Exceeded\n";
        let m = find_first(&markers, text, false).unwrap();
        assert_eq!(m.event, ConsoleEvent::RateLimited);
        assert_eq!(m.end, text.len());
        assert!(m.line.starts_with("Logging in user"));

        let text = "FAILED login with result code Two-factor code mismatch\nSteam>";
        let m = find_first(&markers, text, false).unwrap();
        assert_eq!(m.event, ConsoleEvent::InvalidSecondFactor);

        // Unknown causes still surface as the generic failure
        let text = "FAILED login with result code Account Disabled\nRate Limit Exceeded\n";
        let m = find_first(&markers, text, false).unwrap();
        assert_eq!(m.event, ConsoleEvent::BadCredentials);
        assert_eq!(m.suffix, "with result code Account Disabled");
    }

    #[test]
    fn test_no_marker_in_plain_output() {
        assert!(find_first(&login_markers(), "Loading Steam API...OK\n", false).is_none());
    }

    #[test]
    fn test_parse_build_id() {
        let line = "Successfully finished AppID 480 build (BuildID 1234567).";
        assert_eq!(parse_build_id(line), Some(1234567));
        assert_eq!(parse_build_id("Successfully finished AppID 480 build"), None);
    }

    #[test]
    fn test_parse_quoted_path() {
        let suffix = "\"/opt/steamcmd/steamapps/content/app_480/depot_481\" (12 files, manifest 99)";
        assert_eq!(
            parse_quoted_path(suffix).as_deref(),
            Some("/opt/steamcmd/steamapps/content/app_480/depot_481")
        );
        assert_eq!(parse_quoted_path("no path"), None);
    }
}
