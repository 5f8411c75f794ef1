//! robots.txt rule evaluation backed by the robotstxt crate

use robotstxt::DefaultMatcher;

/// Rules from one origin's robots.txt
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    /// None when the file was missing or unreadable; everything is allowed
    body: Option<String>,
}

impl RobotsRules {
    /// Rules parsed from a robots.txt body
    pub fn parse(body: &str) -> Self {
        Self {
            body: Some(body.to_string()),
        }
    }

    /// Rules that allow every URL, used when robots.txt cannot be fetched
    pub fn permissive() -> Self {
        Self { body: None }
    }

    /// Checks if `url` may be fetched by `agent`
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute URL or path of the resource
    /// * `agent` - Product token matched against `User-agent` lines
    pub fn allows(&self, url: &str, agent: &str) -> bool {
        match self.body.as_deref() {
            None => true,
            Some(body) if body.trim().is_empty() => true,
            Some(body) => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(body, agent, url)
            }
        }
    }

    /// Crawl-delay in seconds that applies to `agent`
    ///
    /// A group naming the agent wins over the `*` group. Consecutive
    /// `User-agent` lines share one group.
    pub fn crawl_delay(&self, agent: &str) -> Option<f64> {
        let body = self.body.as_deref()?;
        let agent = agent.to_lowercase();

        let mut group: Vec<String> = Vec::new();
        let mut group_open = false;
        let mut specific = None;
        let mut wildcard = None;

        for line in body.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            if key == "user-agent" {
                if !group_open {
                    group.clear();
                    group_open = true;
                }
                group.push(value.to_lowercase());
                continue;
            }
            group_open = false;

            if key != "crawl-delay" {
                continue;
            }
            let Ok(delay) = value.parse::<f64>() else {
                continue;
            };
            if group
                .iter()
                .any(|ua| ua != "*" && !ua.is_empty() && agent.contains(ua.as_str()))
            {
                specific = Some(delay);
            } else if group.iter().any(|ua| ua == "*") {
                wildcard = Some(delay);
            }
        }

        specific.or(wildcard)
    }
}
