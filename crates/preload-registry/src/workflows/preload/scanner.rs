use async_trait::async_trait;
use reqwest::header::STRICT_TRANSPORT_SECURITY;
use reqwest::redirect::Policy;

use super::domain::{Issue, Issues, PolicyType};
use super::source::FETCH_TIMEOUT;

pub const ONE_YEAR_SECONDS: u64 = 31_536_000;
pub const EIGHTEEN_WEEKS_SECONDS: u64 = 10_886_400;

/// Decides whether a domain may join or leave the list.
#[async_trait]
pub trait EligibilityScanner: Send + Sync {
    /// Checks the requirements attached to `policy`.
    async fn eligible(&self, domain: &str, policy: &PolicyType) -> Issues;

    async fn removable(&self, domain: &str) -> Issues;

    /// Requirements for a new bulk submission.
    async fn preloadable(&self, domain: &str) -> Issues {
        self.eligible(domain, &PolicyType::Bulk1Year).await
    }
}

/// Parsed `Strict-Transport-Security` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HstsHeader {
    pub max_age: Option<u64>,
    pub include_sub_domains: bool,
    pub preload: bool,
}

impl HstsHeader {
    /// Parses the header value. Malformed `max-age` values are errors;
    /// repeated or unrecognized directives are warnings.
    pub fn parse(raw: &str) -> (Self, Issues) {
        let mut header = HstsHeader::default();
        let mut issues = Issues::default();
        let mut seen: Vec<String> = Vec::new();

        for directive in raw.split(';').map(str::trim).filter(|d| !d.is_empty()) {
            let (name, value) = match directive.split_once('=') {
                Some((name, value)) => (name.trim().to_ascii_lowercase(), Some(value.trim())),
                None => (directive.to_ascii_lowercase(), None),
            };

            if seen.contains(&name) {
                issues.push_warning(Issue::new(
                    "header.parse.repeated_directive",
                    "Repeated directive",
                    format!("The header contains the `{name}` directive more than once."),
                ));
                continue;
            }
            seen.push(name.clone());

            match name.as_str() {
                "max-age" => {
                    let digits = value.unwrap_or_default().trim_matches('"');
                    match digits.parse::<u64>() {
                        Ok(seconds) => header.max_age = Some(seconds),
                        Err(_) => issues.push_error(Issue::new(
                            "header.parse.max_age.parse_int_error",
                            "Invalid max-age",
                            format!("The max-age value `{digits}` is not a whole number of seconds."),
                        )),
                    }
                }
                "includesubdomains" => header.include_sub_domains = true,
                "preload" => header.preload = true,
                _ => issues.push_warning(Issue::new(
                    "header.parse.unknown_directive",
                    "Unknown directive",
                    format!("The header contains an unknown directive: `{name}`."),
                )),
            }
        }

        (header, issues)
    }
}

pub fn required_max_age(policy: &PolicyType) -> u64 {
    match policy {
        PolicyType::Bulk18Weeks => EIGHTEEN_WEEKS_SECONDS,
        _ => ONE_YEAR_SECONDS,
    }
}

/// Checks a header value against the preload requirements of `policy`.
pub fn preloadable_header(raw: Option<&str>, policy: &PolicyType) -> Issues {
    let Some(raw) = raw else {
        return Issues::with_error(Issue::new(
            "response.no_header",
            "No HSTS header",
            "Response error: No HSTS header is present on the response.",
        ));
    };

    let (header, mut issues) = HstsHeader::parse(raw);
    let required = required_max_age(policy);

    match header.max_age {
        None => issues.push_error(Issue::new(
            "header.preloadable.max_age.missing",
            "No max-age directive",
            "Header requirement error: Header must contain a valid `max-age` directive.",
        )),
        Some(max_age) if max_age < required => issues.push_error(Issue::new(
            "header.preloadable.max_age.too_low",
            "Max-age too low",
            format!(
                "Header requirement error: The max-age must be at least {required} seconds, but the header currently only has max-age={max_age}."
            ),
        )),
        Some(_) => {}
    }
    if !header.include_sub_domains {
        issues.push_error(Issue::new(
            "header.preloadable.include_sub_domains.missing",
            "No includeSubDomains directive",
            "Header requirement error: Header must contain the `includeSubDomains` directive.",
        ));
    }
    if !header.preload {
        issues.push_error(Issue::new(
            "header.preloadable.preload.missing",
            "No preload directive",
            "Header requirement error: Header must contain the `preload` directive.",
        ));
    }

    issues
}

/// A domain may leave the list once it stops asking to be preloaded.
pub fn removable_header(raw: Option<&str>) -> Issues {
    let Some(raw) = raw else {
        return Issues::default();
    };

    let (header, mut issues) = HstsHeader::parse(raw);
    if header.preload {
        issues.push_error(Issue::new(
            "header.removable.contains.preload",
            "Contains preload directive",
            "Header requirement error: For preload list removal, the header must not contain the `preload` directive.",
        ));
    }
    issues
}

/// Shape checks that need no network access.
pub fn domain_format_issues(domain: &str) -> Issues {
    let mut issues = Issues::default();
    if !domain.contains('.') {
        issues.push_error(Issue::new(
            "domain.format.only_one_label",
            "Only one label",
            format!("`{domain}` must have at least two labels."),
        ));
    }
    if let Some(parent) = domain.strip_prefix("www.") {
        issues.push_error(Issue::new(
            "domain.format.www",
            "Subdomain",
            format!("`{domain}` is a subdomain. Please preload `{parent}` instead."),
        ));
    }
    issues
}

/// Scanner that requests `https://<domain>/` and inspects the HSTS header.
#[derive(Debug, Clone)]
pub struct HeaderScanner {
    http: reqwest::Client,
}

impl HeaderScanner {
    pub fn new() -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(FETCH_TIMEOUT)
            .build()?;
        Ok(Self { http })
    }

    async fn fetch_header(&self, domain: &str) -> Result<Option<String>, Issues> {
        let response = self
            .http
            .get(format!("https://{domain}/"))
            .send()
            .await
            .map_err(|err| {
                tracing::debug!(domain, error = %err, "header request failed");
                Issues::with_error(Issue::new(
                    "domain.tls.cannot_connect",
                    "Cannot connect using TLS",
                    format!("We cannot connect to https://{domain} using TLS ({err})."),
                ))
            })?;

        let mut values = response.headers().get_all(STRICT_TRANSPORT_SECURITY).iter();
        let Some(first) = values.next() else {
            return Ok(None);
        };
        if values.next().is_some() {
            return Err(Issues::with_error(Issue::new(
                "response.multiple_headers",
                "Multiple HSTS headers",
                "Response error: Multiple HSTS headers are present on the response.",
            )));
        }

        first.to_str().map(|value| Some(value.to_string())).map_err(|_| {
            Issues::with_error(Issue::new(
                "header.parse.invalid_characters",
                "Invalid characters",
                "Header parse error: The header contains characters that are not visible ASCII.",
            ))
        })
    }
}

#[async_trait]
impl EligibilityScanner for HeaderScanner {
    async fn eligible(&self, domain: &str, policy: &PolicyType) -> Issues {
        let issues = domain_format_issues(domain);
        if issues.has_errors() {
            return issues;
        }

        match self.fetch_header(domain).await {
            Ok(header) => {
                let mut combined = issues;
                combined.extend(preloadable_header(header.as_deref(), policy));
                combined
            }
            Err(fetch_issues) => fetch_issues,
        }
    }

    async fn removable(&self, domain: &str) -> Issues {
        match self.fetch_header(domain).await {
            Ok(header) => removable_header(header.as_deref()),
            Err(fetch_issues) => fetch_issues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_directives_case_insensitively() {
        let (header, issues) = HstsHeader::parse("Max-Age=\"63072000\"; IncludeSubDomains; PRELOAD");
        assert!(issues.is_empty());
        assert_eq!(
            header,
            HstsHeader {
                max_age: Some(63_072_000),
                include_sub_domains: true,
                preload: true,
            }
        );
    }

    #[test]
    fn flags_repeated_and_unknown_directives() {
        let (header, issues) = HstsHeader::parse("max-age=10; max-age=20; upgrade");
        assert_eq!(header.max_age, Some(10));
        assert_eq!(
            issues.warning_codes(),
            vec!["header.parse.repeated_directive", "header.parse.unknown_directive"]
        );
    }

    #[test]
    fn complete_header_is_preloadable() {
        let issues = preloadable_header(
            Some("max-age=31536000; includeSubDomains; preload"),
            &PolicyType::Bulk1Year,
        );
        assert_eq!(issues, Issues::default());
    }

    #[test]
    fn eighteen_week_policy_accepts_shorter_max_age() {
        let header = Some("max-age=10886400; includeSubDomains; preload");
        assert!(!preloadable_header(header, &PolicyType::Bulk18Weeks).has_errors());
        assert_eq!(
            preloadable_header(header, &PolicyType::Bulk1Year).error_codes(),
            vec!["header.preloadable.max_age.too_low"]
        );
    }

    #[test]
    fn missing_pieces_are_errors() {
        assert_eq!(
            preloadable_header(None, &PolicyType::Bulk1Year).error_codes(),
            vec!["response.no_header"]
        );
        assert_eq!(
            preloadable_header(Some("max-age=abc"), &PolicyType::Bulk1Year).error_codes(),
            vec![
                "header.parse.max_age.parse_int_error",
                "header.preloadable.max_age.missing",
                "header.preloadable.include_sub_domains.missing",
                "header.preloadable.preload.missing",
            ]
        );
    }

    #[test]
    fn removal_requires_preload_directive_to_be_gone() {
        assert!(!removable_header(None).has_errors());
        assert!(!removable_header(Some("max-age=0")).has_errors());
        assert_eq!(
            removable_header(Some("max-age=31536000; preload")).error_codes(),
            vec!["header.removable.contains.preload"]
        );
    }

    #[test]
    fn domain_shape_checks() {
        assert!(!domain_format_issues("example.com").has_errors());
        assert_eq!(
            domain_format_issues("localhost").error_codes(),
            vec!["domain.format.only_one_label"]
        );
        assert_eq!(
            domain_format_issues("www.example.com").error_codes(),
            vec!["domain.format.www"]
        );
    }
}
