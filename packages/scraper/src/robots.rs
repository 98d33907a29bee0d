//! `robots.txt` fetching and matching.
//!
//! Rules are grouped by `User-agent` lines. A group naming this scraper's
//! product token wins over the `*` group; within the chosen groups the
//! longest matching `Allow`/`Disallow` pattern decides, with `Allow`
//! winning ties. Patterns may use `*` wildcards and a trailing `$` anchor.

use url::Url;

use crate::{ScrapeError, USER_AGENT, read_capped};

/// Largest `robots.txt` body that is read; the rest is ignored.
const MAX_ROBOTS_BYTES: usize = 512 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    allow: bool,
    pattern: String,
}

#[derive(Debug, Clone, Default)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
}

/// Parsed crawl policy for a single host.
#[derive(Debug, Clone, Default)]
pub struct RobotsPolicy {
    groups: Vec<Group>,
}

impl RobotsPolicy {
    /// A policy that allows every path.
    #[must_use]
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parses `robots.txt` content. Unknown directives and stray lines are
    /// ignored, so parsing never fails.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let mut groups: Vec<Group> = Vec::new();
        let mut current: Option<Group> = None;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();

            match directive.trim().to_ascii_lowercase().as_str() {
                "user-agent" => {
                    let agent = value.to_ascii_lowercase();
                    match current.as_mut() {
                        Some(group) if group.rules.is_empty() => group.agents.push(agent),
                        _ => {
                            groups.extend(current.take());
                            current = Some(Group {
                                agents: vec![agent],
                                rules: Vec::new(),
                            });
                        }
                    }
                }
                directive @ ("allow" | "disallow") => {
                    // An empty pattern matches nothing.
                    if value.is_empty() {
                        continue;
                    }
                    if let Some(group) = current.as_mut() {
                        group.rules.push(Rule {
                            allow: directive == "allow",
                            pattern: value.to_owned(),
                        });
                    }
                }
                _ => {}
            }
        }
        groups.extend(current);

        Self { groups }
    }

    /// Whether `user_agent` may fetch `url` under this policy.
    #[must_use]
    pub fn is_allowed(&self, user_agent: &str, url: &Url) -> bool {
        let path = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_owned(),
        };
        self.is_path_allowed(user_agent, &path)
    }

    /// Whether `user_agent` may fetch `path` (path plus optional query).
    #[must_use]
    pub fn is_path_allowed(&self, user_agent: &str, path: &str) -> bool {
        let token = product_token(user_agent);

        let named: Vec<&Group> = self
            .groups
            .iter()
            .filter(|g| g.agents.iter().any(|a| a != "*" && *a == token))
            .collect();
        let groups = if named.is_empty() {
            self.groups
                .iter()
                .filter(|g| g.agents.iter().any(|a| a == "*"))
                .collect()
        } else {
            named
        };

        let mut best: Option<&Rule> = None;
        for rule in groups.iter().flat_map(|g| &g.rules) {
            if !pattern_matches(&rule.pattern, path) {
                continue;
            }
            best = match best {
                Some(current)
                    if current.pattern.len() > rule.pattern.len()
                        || (current.pattern.len() == rule.pattern.len() && current.allow) =>
                {
                    Some(current)
                }
                _ => Some(rule),
            };
        }

        best.is_none_or(|rule| rule.allow)
    }
}

/// The lowercase product token of a user agent (`"EventScrape/0.1 (...)"`
/// becomes `"eventscrape"`).
fn product_token(user_agent: &str) -> String {
    user_agent
        .split(['/', ' '])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = pattern
        .strip_suffix('$')
        .map_or((pattern, false), |p| (p, true));

    let parts: Vec<&str> = pattern.split('*').collect();
    let Some((first, rest_parts)) = parts.split_first() else {
        return true;
    };

    let Some(mut rest) = path.strip_prefix(first) else {
        return false;
    };

    let Some((last, middle)) = rest_parts.split_last() else {
        return !anchored || rest.is_empty();
    };

    for part in middle {
        match rest.find(part) {
            Some(index) => rest = &rest[index + part.len()..],
            None => return false,
        }
    }

    if anchored {
        rest.ends_with(last)
    } else {
        rest.contains(last)
    }
}

/// The `robots.txt` URL for the host serving `page`.
#[must_use]
pub fn robots_url(page: &Url) -> Url {
    let mut url = page.clone();
    url.set_path("/robots.txt");
    url.set_query(None);
    url.set_fragment(None);
    url
}

/// Fetches and parses the crawl policy for the host serving `page`.
///
/// A 2xx body is parsed; a body that is not valid UTF-8 is treated as
/// permissive. Any 3xx or 4xx (including 404 and 410) means the site
/// publishes no policy, which is also permissive.
///
/// # Errors
///
/// Returns [`ScrapeError::Robots`] on a network failure or a 5xx answer.
/// Whether that blocks scraping is the caller's decision.
pub async fn fetch_policy(
    client: &reqwest::Client,
    page: &Url,
) -> Result<RobotsPolicy, ScrapeError> {
    let url = robots_url(page);
    let robots_error = |reason: String| ScrapeError::Robots {
        url: url.to_string(),
        reason,
    };

    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| robots_error(e.to_string()))?;

    let status = response.status();
    if status.is_server_error() {
        return Err(robots_error(format!("server answered {status}")));
    }
    if !status.is_success() {
        log::debug!("[robots] {url} answered {status}, treating as allow-all");
        return Ok(RobotsPolicy::allow_all());
    }

    let body = read_capped(response, MAX_ROBOTS_BYTES)
        .await
        .map_err(|e| robots_error(e.to_string()))?;

    match String::from_utf8(body) {
        Ok(content) => Ok(RobotsPolicy::parse(&content)),
        Err(_) => {
            log::warn!("[robots] {url} is not valid UTF-8, treating as allow-all");
            Ok(RobotsPolicy::allow_all())
        }
    }
}

/// Checks whether this scraper may fetch `url`.
///
/// # Errors
///
/// Propagates [`fetch_policy`] failures.
pub async fn is_allowed(client: &reqwest::Client, url: &Url) -> Result<bool, ScrapeError> {
    let policy = fetch_policy(client, url).await?;
    Ok(policy.is_allowed(USER_AGENT, url))
}

#[cfg(test)]
mod tests {
    use super::*;

    const UA: &str = USER_AGENT;

    #[test]
    fn empty_policy_allows_everything() {
        let policy = RobotsPolicy::parse("");
        assert!(policy.is_path_allowed(UA, "/"));
        assert!(policy.is_path_allowed(UA, "/events/2026"));
    }

    #[test]
    fn wildcard_group_disallow_prefix() {
        let policy = RobotsPolicy::parse(
            "User-agent: *\nDisallow: /private/\nDisallow: /admin\n",
        );
        assert!(policy.is_path_allowed(UA, "/events"));
        assert!(!policy.is_path_allowed(UA, "/private/page"));
        assert!(!policy.is_path_allowed(UA, "/admin/users"));
    }

    #[test]
    fn named_group_overrides_wildcard_group() {
        let policy = RobotsPolicy::parse(
            "User-agent: *\nDisallow: /\n\nUser-agent: EventScrape\nDisallow: /drafts\n",
        );
        assert!(policy.is_path_allowed(UA, "/events"));
        assert!(!policy.is_path_allowed(UA, "/drafts/1"));
        assert!(!policy.is_path_allowed("OtherBot/1.0", "/events"));
    }

    #[test]
    fn consecutive_user_agents_share_a_group() {
        let policy = RobotsPolicy::parse(
            "User-agent: googlebot\nUser-agent: eventscrape\nDisallow: /calendar\n",
        );
        assert!(!policy.is_path_allowed(UA, "/calendar"));
    }

    #[test]
    fn longest_match_wins_and_allow_wins_ties() {
        let policy = RobotsPolicy::parse(
            "User-agent: *\nDisallow: /events\nAllow: /events/public\nDisallow: /a\nAllow: /a\n",
        );
        assert!(!policy.is_path_allowed(UA, "/events/private"));
        assert!(policy.is_path_allowed(UA, "/events/public/1"));
        assert!(policy.is_path_allowed(UA, "/a"));
    }

    #[test]
    fn empty_disallow_allows_everything() {
        let policy = RobotsPolicy::parse("User-agent: *\nDisallow:\n");
        assert!(policy.is_path_allowed(UA, "/anything"));
    }

    #[test]
    fn wildcards_and_end_anchor() {
        let policy = RobotsPolicy::parse(
            "User-agent: *\nDisallow: /*.pdf$\nDisallow: /search*q=\n",
        );
        assert!(!policy.is_path_allowed(UA, "/files/program.pdf"));
        assert!(policy.is_path_allowed(UA, "/files/program.pdf.html"));
        assert!(!policy.is_path_allowed(UA, "/search?q=jazz"));
        assert!(policy.is_path_allowed(UA, "/search"));
    }

    #[test]
    fn comments_are_ignored() {
        let policy = RobotsPolicy::parse(
            "# robots for venue.example\nUser-agent: * # everyone\nDisallow: /tmp # scratch\n",
        );
        assert!(!policy.is_path_allowed(UA, "/tmp/x"));
    }

    #[test]
    fn is_allowed_includes_query_string() {
        let policy = RobotsPolicy::parse("User-agent: *\nDisallow: /events?page=\n");
        let url = Url::parse("https://venue.example/events?page=3").unwrap();
        assert!(!policy.is_allowed(UA, &url));
    }

    #[test]
    fn robots_url_keeps_scheme_host_and_port() {
        let page = Url::parse("http://venue.example:8080/events/list?x=1#top").unwrap();
        assert_eq!(
            robots_url(&page).as_str(),
            "http://venue.example:8080/robots.txt"
        );
    }
}
