//! Default AT sub-probe scripts and response classifiers (§4.3).

use std::time::Duration;

/// One command in a sub-probe's retry list.
#[derive(Debug, Clone)]
pub struct AtCommand {
    pub text: String,
    pub timeout: Duration,
}

impl AtCommand {
    pub fn new(text: impl Into<String>, timeout: Duration) -> Self {
        Self {
            text: text.into(),
            timeout,
        }
    }
}

/// Result of classifying one command's response (§4.3 "Classifier contract").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifyOutcome<T> {
    /// Move on to the next command in the list.
    KeepTrying,
    /// Store this value and end the sub-probe.
    Decided(T),
    /// Terminal: the port must not be classified at all.
    Abort,
}

const THREE_SECONDS: Duration = Duration::from_secs(3);

/// Default `AT` sub-probe: `"AT"` x3, 3s each.
#[must_use]
pub fn default_at_script() -> Vec<AtCommand> {
    vec![
        AtCommand::new("AT", THREE_SECONDS),
        AtCommand::new("AT", THREE_SECONDS),
        AtCommand::new("AT", THREE_SECONDS),
    ]
}

/// Default vendor sub-probe: `+CGMI`, `+GMI`, `I`, 3s each.
#[must_use]
pub fn default_vendor_script() -> Vec<AtCommand> {
    vec![
        AtCommand::new("+CGMI", THREE_SECONDS),
        AtCommand::new("+GMI", THREE_SECONDS),
        AtCommand::new("I", THREE_SECONDS),
    ]
}

/// Default product sub-probe: `+CGMM`, `+GMM`, `I`, 3s each.
#[must_use]
pub fn default_product_script() -> Vec<AtCommand> {
    vec![
        AtCommand::new("+CGMM", THREE_SECONDS),
        AtCommand::new("+GMM", THREE_SECONDS),
        AtCommand::new("I", THREE_SECONDS),
    ]
}

/// Default Icera sub-probe: `%IPSYS?` x3, 3s each.
#[must_use]
pub fn default_icera_script() -> Vec<AtCommand> {
    vec![
        AtCommand::new("%IPSYS?", THREE_SECONDS),
        AtCommand::new("%IPSYS?", THREE_SECONDS),
        AtCommand::new("%IPSYS?", THREE_SECONDS),
    ]
}

/// `AT` classifier: `OK` in the response decides `true`; anything else
/// (including `ERROR`) moves on to the next command in the list.
#[must_use]
pub fn at_bool_classifier(response: &str) -> ClassifyOutcome<bool> {
    if response_lines(response).any(|l| l == "OK") {
        ClassifyOutcome::Decided(true)
    } else {
        ClassifyOutcome::KeepTrying
    }
}

/// Vendor/product classifier: concatenation of non-empty response lines
/// minus the final-result-code lines. Decides as soon as a command yields
/// any informative line; an `ERROR`-only response moves on.
#[must_use]
pub fn info_string_classifier(response: &str) -> ClassifyOutcome<Option<String>> {
    let info: Vec<&str> = response_lines(response)
        .filter(|l| *l != "OK" && *l != "ERROR")
        .collect();
    if info.is_empty() {
        ClassifyOutcome::KeepTrying
    } else {
        ClassifyOutcome::Decided(Some(info.join(" ")))
    }
}

/// Icera classifier: `%IPSYS:` in the response decides `true`; anything
/// else moves on (the sub-probe decides `false` once the list is
/// exhausted, per §4.3).
#[must_use]
pub fn icera_bool_classifier(response: &str) -> ClassifyOutcome<bool> {
    if response.contains("%IPSYS:") {
        ClassifyOutcome::Decided(true)
    } else {
        ClassifyOutcome::KeepTrying
    }
}

fn response_lines(response: &str) -> impl Iterator<Item = &str> {
    response.lines().map(str::trim).filter(|l| !l.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_classifier_decides_true_on_ok() {
        assert_eq!(at_bool_classifier("OK"), ClassifyOutcome::Decided(true));
    }

    #[test]
    fn at_classifier_keeps_trying_on_error() {
        assert_eq!(at_bool_classifier("ERROR"), ClassifyOutcome::KeepTrying);
    }

    #[test]
    fn info_classifier_extracts_vendor_line() {
        assert_eq!(
            info_string_classifier("HUAWEI\r\nOK"),
            ClassifyOutcome::Decided(Some("HUAWEI".to_string()))
        );
    }

    #[test]
    fn info_classifier_keeps_trying_on_bare_ok() {
        assert_eq!(info_string_classifier("OK"), ClassifyOutcome::KeepTrying);
    }

    #[test]
    fn icera_classifier_detects_marker() {
        assert_eq!(
            icera_bool_classifier("%IPSYS: 0,2\r\nOK"),
            ClassifyOutcome::Decided(true)
        );
    }

    #[test]
    fn icera_classifier_keeps_trying_without_marker() {
        assert_eq!(icera_bool_classifier("ERROR"), ClassifyOutcome::KeepTrying);
    }
}
