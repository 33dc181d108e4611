use std::sync::OnceLock;

use regex::Regex;

const PR_URL_PATTERN: &str =
    r"https?://(?:www\.)?(?:github\.com|gitlab\.com)/\S+?/(?:pull|-/merge_requests|merge_requests)/\d+";

fn pr_url_regex() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(PR_URL_PATTERN).ok()).as_ref()
}

/// First pull/merge request URL in `text`, if any.
pub fn extract_pr_url(text: &str) -> Option<String> {
    pr_url_regex()?
        .find(text)
        .map(|found| found.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::extract_pr_url;

    #[test]
    fn finds_github_pull_urls_in_cli_chatter() {
        let output = "Creating pull request for feat into main\n\nhttps://github.com/acme/widgets/pull/42\n";
        assert_eq!(
            extract_pr_url(output).as_deref(),
            Some("https://github.com/acme/widgets/pull/42")
        );
    }

    #[test]
    fn finds_gitlab_merge_request_urls() {
        assert_eq!(
            extract_pr_url("see https://gitlab.com/group/sub/proj/-/merge_requests/7 now").as_deref(),
            Some("https://gitlab.com/group/sub/proj/-/merge_requests/7")
        );
    }

    #[test]
    fn ignores_other_hosts_and_non_pr_paths() {
        assert_eq!(extract_pr_url("https://example.com/acme/widgets/pull/42"), None);
        assert_eq!(extract_pr_url("https://github.com/acme/widgets/issues/42"), None);
        assert_eq!(extract_pr_url(""), None);
    }
}
