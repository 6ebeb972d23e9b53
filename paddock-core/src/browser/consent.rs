use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::debug;

use super::page::BrowserPage;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Case-insensitive match of trimmed button text against the consent texts.
pub fn matches_consent_text(candidate: &str, texts: &[String]) -> Option<String> {
    let candidate = candidate.split_whitespace().collect::<Vec<_>>().join(" ");
    texts
        .iter()
        .find(|text| candidate.eq_ignore_ascii_case(text.trim()))
        .cloned()
}

const CONTROLS: &str =
    r#"button, a, [role="button"], input[type="button"], input[type="submit"]"#;

/// Script evaluated in the page; returns the label of every clickable control,
/// empty for hidden ones, in document order.
pub fn control_labels_script() -> String {
    format!(
        r#"Array.from(document.querySelectorAll('{CONTROLS}')).map(el =>
    el.offsetParent === null ? '' : (el.innerText || el.value || '').replace(/\s+/g, ' ').trim())"#
    )
}

/// Script that clicks the control at `index` of the same selection.
pub fn click_control_script(index: usize) -> String {
    format!(
        r#"(() => {{
    const el = document.querySelectorAll('{CONTROLS}')[{index}];
    if (!el) return false;
    el.click();
    return true;
}})()"#
    )
}

/// First label that matches a consent text, by position.
pub fn first_consent_control(labels: &[String], texts: &[String]) -> Option<(usize, String)> {
    labels
        .iter()
        .enumerate()
        .find_map(|(index, label)| matches_consent_text(label, texts).map(|text| (index, text)))
}

/// Polls for a consent control until one is clicked or `grace` elapses.
/// Never fails; evaluation errors just end the attempt.
pub async fn dismiss_consent(
    page: &mut dyn BrowserPage,
    texts: &[String],
    grace: Duration,
) -> Option<String> {
    if texts.is_empty() || grace.is_zero() {
        return None;
    }
    let deadline = Instant::now() + grace;
    loop {
        match page.click_consent(texts).await {
            Ok(Some(clicked)) => {
                debug!(button = %clicked, "Dismissed consent dialog");
                return Some(clicked);
            }
            Ok(None) => {}
            Err(err) => {
                debug!(error = %err, "Consent probe failed");
                return None;
            }
        }
        if Instant::now() + POLL_INTERVAL > deadline {
            return None;
        }
        sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts() -> Vec<String> {
        ["Accept", "Accept All", "I Agree", "Allow", "Continue"]
            .iter()
            .map(|t| t.to_string())
            .collect()
    }

    #[test]
    fn matches_ignore_case_and_spacing() {
        assert_eq!(
            matches_consent_text("  accept   all ", &texts()),
            Some("Accept All".to_string())
        );
        assert_eq!(matches_consent_text("I AGREE", &texts()), Some("I Agree".into()));
        assert_eq!(matches_consent_text("Manage options", &texts()), None);
    }

    #[test]
    fn first_visible_match_wins() {
        let labels: Vec<String> = ["", "Manage options", "ACCEPT  ALL", "Accept"]
            .iter()
            .map(|l| l.to_string())
            .collect();
        assert_eq!(
            first_consent_control(&labels, &texts()),
            Some((2, "Accept All".to_string()))
        );
        assert_eq!(first_consent_control(&labels[..2], &texts()), None);
    }

    #[test]
    fn scripts_share_one_selection() {
        assert!(control_labels_script().contains(CONTROLS));
        assert!(click_control_script(4).contains(&format!("('{CONTROLS}')[4]")));
    }
}
