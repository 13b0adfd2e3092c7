use anyhow::{bail, Result};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `+`
    SingleLevel,
    /// `#`, only valid as the last segment
    MultiLevel,
}

/// MQTT-style topic filter (`presence/+/+`, `presence/#`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    raw: String,
    segments: Vec<Segment>,
}

impl TopicFilter {
    pub fn new(filter: &str) -> Result<Self> {
        if filter.is_empty() {
            bail!("topic filter cannot be empty");
        }

        let parts: Vec<&str> = filter.split('/').collect();
        let mut segments = Vec::with_capacity(parts.len());

        for (i, part) in parts.iter().enumerate() {
            let segment = match *part {
                "" => bail!("topic filter '{filter}' has an empty segment"),
                "+" => Segment::SingleLevel,
                "#" if i == parts.len() - 1 => Segment::MultiLevel,
                "#" => bail!("'#' must be the last segment of topic filter '{filter}'"),
                literal if literal.contains(['+', '#']) => {
                    bail!("wildcard mixed into segment '{literal}' of topic filter '{filter}'")
                }
                // NATS reserves '.' as its token separator
                literal if literal.contains('.') => {
                    bail!("segment '{literal}' of topic filter '{filter}' contains '.'")
                }
                literal => Segment::Literal(literal.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: filter.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, topic: &str) -> bool {
        let mut levels = topic.split('/');

        for segment in &self.segments {
            match segment {
                Segment::MultiLevel => return true,
                Segment::SingleLevel => {
                    if levels.next().is_none() {
                        return false;
                    }
                }
                Segment::Literal(expected) => match levels.next() {
                    Some(level) if level == expected => {}
                    _ => return false,
                },
            }
        }

        levels.next().is_none()
    }

    /// Equivalent NATS subject filter, e.g. `presence/+/+` becomes `presence.*.*`
    pub fn to_nats_subject(&self) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(literal) => literal.as_str(),
                Segment::SingleLevel => "*",
                Segment::MultiLevel => ">",
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// First literal segment, which names the stream the filter reads from
    pub fn namespace(&self) -> Option<&str> {
        match self.segments.first() {
            Some(Segment::Literal(literal)) => Some(literal.as_str()),
            _ => None,
        }
    }
}

impl FromStr for TopicFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Map an inbound NATS subject back onto the MQTT topic it was bridged from.
///
/// The bridge carries a `.` inside a topic level as `//`, so each token is
/// decoded on its own before the levels are rejoined with `/`.
pub fn topic_from_subject(subject: &str) -> String {
    subject
        .split('.')
        .map(|token| token.replace("//", "."))
        .collect::<Vec<_>>()
        .join("/")
}

/// Action fired for a matched notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleTarget {
    TimeSeries,
    DomainEvents,
}

impl RuleTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleTarget::TimeSeries => "time-series",
            RuleTarget::DomainEvents => "domain-events",
        }
    }
}

impl fmt::Display for RuleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const CONNECTIVITY_RULE_NAME: &str = "ConnectivityRule";
pub const DEFAULT_PRESENCE_TOPIC_FILTER: &str = "presence/+/+";

/// Selects presence notifications by topic and names the targets they are routed to.
///
/// Stateless: selection looks at the topic only, never at device identity or event type.
#[derive(Debug, Clone)]
pub struct IngestionRule {
    name: String,
    filter: TopicFilter,
    targets: Vec<RuleTarget>,
}

impl IngestionRule {
    pub fn new(name: impl Into<String>, filter: TopicFilter, targets: Vec<RuleTarget>) -> Self {
        Self {
            name: name.into(),
            filter,
            targets,
        }
    }

    /// `ConnectivityRule`: both targets on the given presence filter
    pub fn connectivity(filter: TopicFilter) -> Self {
        Self::new(
            CONNECTIVITY_RULE_NAME,
            filter,
            vec![RuleTarget::TimeSeries, RuleTarget::DomainEvents],
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filter(&self) -> &TopicFilter {
        &self.filter
    }

    pub fn targets(&self) -> &[RuleTarget] {
        &self.targets
    }

    /// Targets to fire for `topic`, or `None` when the rule does not match
    pub fn select(&self, topic: &str) -> Option<&[RuleTarget]> {
        self.filter
            .matches(topic)
            .then_some(self.targets.as_slice())
    }

    /// Durable consumer name for a single target, e.g. `connectivity-rule-time-series`
    pub fn consumer_name(&self, target: RuleTarget) -> String {
        format!("{}-{}", self.consumer_prefix(), target)
    }

    /// Durable consumer name when one consumer serves every target
    pub fn combined_consumer_name(&self) -> String {
        self.consumer_prefix()
    }

    fn consumer_prefix(&self) -> String {
        let mut prefix = String::with_capacity(self.name.len() + 4);
        for (i, ch) in self.name.chars().enumerate() {
            if ch.is_ascii_uppercase() {
                if i > 0 {
                    prefix.push('-');
                }
                prefix.push(ch.to_ascii_lowercase());
            } else if ch.is_ascii_alphanumeric() {
                prefix.push(ch);
            } else {
                prefix.push('-');
            }
        }
        prefix
    }
}

impl Default for IngestionRule {
    fn default() -> Self {
        let filter = TopicFilter::new(DEFAULT_PRESENCE_TOPIC_FILTER)
            .expect("default presence topic filter is valid");
        Self::connectivity(filter)
    }
}
