//! Supervisor job rules.
//!
//! A configuration is one or more YAML documents: exactly one sequence of
//! job entries, plus an optional settings document (currently just `SHELL`,
//! the command prefix jobs run under). Each job entry carries a `JOB`
//! command template and an optional `DEVICE` predicate; an entry without a
//! predicate is *bare* and runs once at supervisor startup.
//!
//! Predicates compile to anchored regexes and numeric capability
//! requirements up front, so matching against a [`DeviceProfile`] is pure:
//! the same profile and rule set always produce the same answer, whatever
//! order devices appear in.

use crate::describe::CodeRef;
use crate::device::DeviceProfile;
use crate::error::{Error, Result};
use crate::names;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;

/// `JOB`: one shell template, or several launched together.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum JobCommand {
    One(String),
    Many(Vec<String>),
}

/// A scalar that YAML may give us as a number or a string; rules treat both
/// as regex text (numeric fields match against their decimal rendering).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScalarPattern {
    Number(i64),
    Text(String),
}

impl ScalarPattern {
    fn into_text(self) -> String {
        match self {
            ScalarPattern::Number(number) => number.to_string(),
            ScalarPattern::Text(text) => text,
        }
    }
}

/// The `DEVICE` predicate of a job entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceSpec {
    #[serde(rename = "LINK", default)]
    pub link: Option<String>,
    #[serde(rename = "NAME", default)]
    pub name: Option<String>,
    #[serde(rename = "LOCATION", default)]
    pub location: Option<String>,
    #[serde(rename = "ID", default)]
    pub id: Option<String>,
    #[serde(rename = "PRODUCT", default)]
    pub product: Option<ScalarPattern>,
    #[serde(rename = "VENDOR", default)]
    pub vendor: Option<ScalarPattern>,
    #[serde(rename = "BUSTYPE", default)]
    pub bustype: Option<ScalarPattern>,
    #[serde(rename = "DRIVER_VERSION", default)]
    pub driver_version: Option<ScalarPattern>,
    #[serde(rename = "PROPERTIES", default)]
    pub properties: Vec<String>,
    #[serde(rename = "EVENTS", default)]
    pub events: BTreeMap<String, Option<Vec<CodeRef>>>,
}

/// One job entry as it appears in configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSpec {
    #[serde(rename = "JOB")]
    pub job: JobCommand,
    #[serde(rename = "DEVICE", default)]
    pub device: Option<DeviceSpec>,
}

/// Optional settings document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(rename = "SHELL", default)]
    pub shell: Option<Vec<String>>,
}

/// The default command prefix for job templates.
pub fn default_shell() -> Vec<String> {
    vec!["sh".into(), "-c".into()]
}

struct Matcher {
    link: Option<Regex>,
    name: Option<Regex>,
    location: Option<Regex>,
    id: Option<Regex>,
    product: Option<Regex>,
    vendor: Option<Regex>,
    bustype: Option<Regex>,
    driver_version: Option<Regex>,
    properties: Vec<u16>,
    events: Vec<(u16, Vec<u16>)>,
}

impl Matcher {
    fn compile(spec: DeviceSpec) -> Result<Self> {
        let mut properties = Vec::new();
        for token in spec.properties {
            let property = names::resolve_property(&token)
                .ok_or_else(|| Error::Config(format!("invalid PROPERTY: {token}")))?;
            properties.push(property);
        }

        let mut events = Vec::new();
        for (type_token, code_tokens) in spec.events {
            let event_type = names::resolve_event_type(&type_token)
                .ok_or_else(|| Error::Config(format!("invalid EVENT TYPE: {type_token}")))?;
            let mut codes = Vec::new();
            for code_ref in code_tokens.unwrap_or_default() {
                let code = code_ref.resolve(event_type).ok_or_else(|| {
                    Error::Config(format!("invalid EVENT CODE for {type_token}: {code_ref:?}"))
                })?;
                codes.push(code);
            }
            events.push((event_type, codes));
        }

        Ok(Self {
            link: compile_pattern(spec.link)?,
            name: compile_pattern(spec.name)?,
            location: compile_pattern(spec.location)?,
            id: compile_pattern(spec.id)?,
            product: compile_pattern(spec.product.map(ScalarPattern::into_text))?,
            vendor: compile_pattern(spec.vendor.map(ScalarPattern::into_text))?,
            bustype: compile_pattern(spec.bustype.map(ScalarPattern::into_text))?,
            driver_version: compile_pattern(spec.driver_version.map(ScalarPattern::into_text))?,
            properties,
            events,
        })
    }

    fn matches(&self, profile: &DeviceProfile) -> bool {
        if let Some(link) = &self.link {
            if !profile.links.iter().any(|name| link.is_match(name)) {
                return false;
            }
        }

        if !field_matches(&self.name, &profile.name)
            || !field_matches(&self.location, &profile.location)
            || !field_matches(&self.id, &profile.id)
            || !field_matches(&self.product, &profile.product.to_string())
            || !field_matches(&self.vendor, &profile.vendor.to_string())
            || !field_matches(&self.bustype, &profile.bustype.to_string())
            || !field_matches(&self.driver_version, &profile.driver_version.to_string())
        {
            return false;
        }

        if !self
            .properties
            .iter()
            .all(|&property| profile.has_property(property))
        {
            return false;
        }

        // Each required type must be present; a listed code set is
        // satisfied by any one of its codes.
        self.events.iter().all(|(event_type, codes)| {
            profile.has_event_type(*event_type)
                && (codes.is_empty()
                    || codes
                        .iter()
                        .any(|&code| profile.has_event_code(*event_type, code)))
        })
    }
}

/// Unspecified fields match anything.
fn field_matches(regex: &Option<Regex>, value: &str) -> bool {
    regex.as_ref().map_or(true, |regex| regex.is_match(value))
}

/// Compile with whole-string anchoring, the semantics the rule fields have
/// always had.
fn compile_pattern(pattern: Option<String>) -> Result<Option<Regex>> {
    let Some(pattern) = pattern else {
        return Ok(None);
    };
    Regex::new(&format!(r"\A(?:{pattern})\z"))
        .map(Some)
        .map_err(|e| Error::Config(format!("bad pattern {pattern:?}: {e}")))
}

/// A compiled rule: the commands to launch and an optional device predicate.
pub struct Rule {
    commands: Vec<Vec<String>>,
    matcher: Option<Matcher>,
}

impl Rule {
    /// Compile a job entry under the given shell prefix.
    pub fn compile(spec: JobSpec, shell: &[String]) -> Result<Self> {
        if shell.is_empty() {
            return Err(Error::Config("SHELL must not be empty".into()));
        }

        let templates = match spec.job {
            JobCommand::One(template) => vec![template],
            JobCommand::Many(templates) => templates,
        };
        let commands = templates
            .into_iter()
            .map(|template| {
                let mut argv = shell.to_vec();
                argv.push(template);
                argv
            })
            .collect();

        let matcher = spec.device.map(Matcher::compile).transpose()?;
        Ok(Self { commands, matcher })
    }

    /// Argument vectors to launch, shell prefix included.
    pub fn commands(&self) -> &[Vec<String>] {
        &self.commands
    }

    /// A bare rule runs once at startup and never matches a device.
    pub fn is_bare(&self) -> bool {
        self.matcher.is_none()
    }

    pub fn matches(&self, profile: &DeviceProfile) -> bool {
        match &self.matcher {
            Some(matcher) => matcher.matches(profile),
            None => false,
        }
    }
}

/// The first rule matching a profile, if any. First match wins; at most one
/// rule fires per device.
pub fn first_match<'r>(rules: &'r [Rule], profile: &DeviceProfile) -> Option<&'r Rule> {
    rules.iter().find(|rule| rule.matches(profile))
}

/// Parse one configuration file's worth of YAML documents into rules.
pub fn parse_config(text: &str) -> Result<Vec<Rule>> {
    let mut jobs: Option<Vec<JobSpec>> = None;
    let mut settings: Option<Settings> = None;

    for document in serde_yaml::Deserializer::from_str(text) {
        let value = serde_yaml::Value::deserialize(document)
            .map_err(|e| Error::Config(format!("unreadable configuration: {e}")))?;
        match value {
            serde_yaml::Value::Null => {}
            serde_yaml::Value::Sequence(_) => {
                if jobs.is_some() {
                    return Err(Error::Config(
                        "configuration must contain exactly one job sequence document".into(),
                    ));
                }
                jobs = Some(
                    serde_yaml::from_value(value)
                        .map_err(|e| Error::Config(format!("bad job entry: {e}")))?,
                );
            }
            serde_yaml::Value::Mapping(_) => {
                if settings.is_some() {
                    return Err(Error::Config(
                        "configuration must contain at most one settings document".into(),
                    ));
                }
                settings = Some(
                    serde_yaml::from_value(value)
                        .map_err(|e| Error::Config(format!("bad settings document: {e}")))?,
                );
            }
            _ => {
                return Err(Error::Config(
                    "configuration documents must be a job sequence or a settings map".into(),
                ));
            }
        }
    }

    let specs = jobs.ok_or_else(|| {
        Error::Config("configuration must contain a job sequence document".into())
    })?;
    let shell = settings
        .and_then(|settings| settings.shell)
        .unwrap_or_else(default_shell);

    specs
        .into_iter()
        .map(|spec| Rule::compile(spec, &shell))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EV_ABS, EV_KEY};
    use std::collections::HashSet;

    fn keyboard_profile() -> DeviceProfile {
        let mut profile = DeviceProfile {
            name: "TestKeyboard".into(),
            location: "usb-0000:00:14.0-3/input0".into(),
            product: 591,
            vendor: 1452,
            bustype: 3,
            driver_version: 0x010001,
            links: vec!["/dev/input/by-id/usb-Test-event-kbd".into()],
            ..Default::default()
        };
        profile.properties.insert(0);
        profile
            .events
            .insert(EV_KEY, [1u16, 30, 31, 32].into_iter().collect());
        profile.events.insert(crate::event::EV_SYN, HashSet::new());
        profile
    }

    #[test]
    fn test_name_rule_matches() {
        let rules = parse_config(
            "- JOB: echo $DEVNODE > /tmp/captured\n  DEVICE:\n    NAME: Test.*\n",
        )
        .unwrap();
        assert_eq!(rules.len(), 1);
        assert!(!rules[0].is_bare());
        assert!(rules[0].matches(&keyboard_profile()));
        assert_eq!(
            rules[0].commands(),
            &[vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo $DEVNODE > /tmp/captured".to_string()
            ]]
        );
    }

    #[test]
    fn test_patterns_are_anchored() {
        let rules =
            parse_config("- JOB: 'true'\n  DEVICE:\n    NAME: Keyboard\n").unwrap();
        let mut profile = keyboard_profile();
        profile.name = "Keyboard".into();
        assert!(rules[0].matches(&profile));
        // A substring hit is not a match.
        profile.name = "TestKeyboard".into();
        assert!(!rules[0].matches(&profile));
    }

    #[test]
    fn test_numeric_fields_match_decimal_rendering() {
        let rules = parse_config(
            "- JOB: 'true'\n  DEVICE:\n    VENDOR: 1452\n    BUSTYPE: '3'\n",
        )
        .unwrap();
        assert!(rules[0].matches(&keyboard_profile()));

        let rules = parse_config("- JOB: 'true'\n  DEVICE:\n    VENDOR: 9999\n").unwrap();
        assert!(!rules[0].matches(&keyboard_profile()));
    }

    #[test]
    fn test_link_requirement() {
        let rules = parse_config(
            "- JOB: 'true'\n  DEVICE:\n    LINK: /dev/input/by-id/.*-kbd\n",
        )
        .unwrap();
        assert!(rules[0].matches(&keyboard_profile()));

        let mut unlinked = keyboard_profile();
        unlinked.links.clear();
        assert!(!rules[0].matches(&unlinked));
    }

    #[test]
    fn test_property_and_event_requirements() {
        let config = "- JOB: 'true'\n  DEVICE:\n    PROPERTIES: [INPUT_PROP_POINTER]\n    EVENTS:\n      EV_KEY: [KEY_A, KEY_Z]\n";
        let rules = parse_config(config).unwrap();
        // KEY_A is supported, KEY_Z is not; one listed code is enough.
        assert!(rules[0].matches(&keyboard_profile()));

        let mut no_property = keyboard_profile();
        no_property.properties.clear();
        assert!(!rules[0].matches(&no_property));

        let rules =
            parse_config("- JOB: 'true'\n  DEVICE:\n    EVENTS:\n      EV_ABS:\n").unwrap();
        assert!(!rules[0].matches(&keyboard_profile()));
        let mut with_abs = keyboard_profile();
        with_abs.events.insert(EV_ABS, HashSet::new());
        assert!(rules[0].matches(&with_abs));
    }

    #[test]
    fn test_bare_rules_never_match_devices() {
        let rules = parse_config("- JOB: echo started\n").unwrap();
        assert!(rules[0].is_bare());
        assert!(!rules[0].matches(&keyboard_profile()));
    }

    #[test]
    fn test_first_match_wins() {
        let config = "- JOB: first\n  DEVICE:\n    NAME: Test.*\n- JOB: second\n  DEVICE:\n    NAME: .*\n";
        let rules = parse_config(config).unwrap();
        let profile = keyboard_profile();
        let winner = first_match(&rules, &profile).unwrap();
        assert_eq!(winner.commands()[0][2], "first");
        // Matching is pure: asking again gives the same answer.
        assert_eq!(
            first_match(&rules, &profile).unwrap().commands()[0][2],
            "first"
        );
    }

    #[test]
    fn test_job_list_spawns_multiple_commands() {
        let rules = parse_config("- JOB: [one, two]\n").unwrap();
        assert_eq!(rules[0].commands().len(), 2);
        assert_eq!(rules[0].commands()[1][2], "two");
    }

    #[test]
    fn test_shell_settings_document() {
        let config = "SHELL: [bash, -lc]\n---\n- JOB: echo hi\n";
        let rules = parse_config(config).unwrap();
        assert_eq!(
            rules[0].commands()[0],
            vec!["bash".to_string(), "-lc".to_string(), "echo hi".to_string()]
        );
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        assert!(matches!(
            parse_config("- DEVICE:\n    NAME: x\n"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            parse_config("- JOB: 'true'\n  DEVICE:\n    PROPERTIES: [INPUT_PROP_WARP]\n"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            parse_config("- JOB: 'true'\n  DEVICE:\n    EVENTS:\n      EV_NOPE:\n"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            parse_config("- JOB: 'true'\n  DEVICE:\n    EVENTS:\n      EV_KEY: [KEY_NOPE]\n"),
            Err(Error::Config(_))
        ));
        assert!(matches!(parse_config("42\n"), Err(Error::Config(_))));
        assert!(matches!(parse_config(""), Err(Error::Config(_))));
    }
}
