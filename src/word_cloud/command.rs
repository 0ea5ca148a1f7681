use super::handler::{Scope, TimeSpec};
use super::time::Period;
use regex::Regex;
use std::sync::OnceLock;

/// 聊天指令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Cloud { scope: Scope, time: TimeSpec },
    SetSchedule(Option<String>),
    RemoveSchedule,
    ShowSchedule,
}

static PERIOD_REGEX: OnceLock<Regex> = OnceLock::new();
static RANGE_REGEX: OnceLock<Regex> = OnceLock::new();
static SCHEDULE_REGEX: OnceLock<Regex> = OnceLock::new();

fn period_regex() -> &'static Regex {
    PERIOD_REGEX.get_or_init(|| {
        Regex::new(
            r"^(本群|我的)?(今日|今天|昨日|昨天|本周|上周|近7天|近30天|本月|上月|本季度|本季|今年|年度|去年|总|历史)词云$",
        )
        .unwrap()
    })
}

fn range_regex() -> &'static Regex {
    RANGE_REGEX.get_or_init(|| {
        Regex::new(r"^(本群|我的)?词云\s+([0-9/\-]+)\s*[~到至]\s*([0-9/\-]+)$").unwrap()
    })
}

fn schedule_regex() -> &'static Regex {
    SCHEDULE_REGEX.get_or_init(|| Regex::new(r"^定时词云(?:\s+(\S+))?$").unwrap())
}

fn scope_of(s: Option<&str>) -> Scope {
    match s {
        Some("我的") => Scope::Mine,
        _ => Scope::Group,
    }
}

/// 去掉指令前缀，前缀列表为空时整行都视为指令
pub fn strip_prefix<'a>(text: &'a str, prefixes: &[String]) -> Option<&'a str> {
    let trimmed = text.trim();
    if prefixes.is_empty() {
        return Some(trimmed);
    }
    prefixes
        .iter()
        .find_map(|p| trimmed.strip_prefix(p.as_str()))
        .map(str::trim_start)
}

pub fn parse_command(text: &str, prefixes: &[String]) -> Option<Command> {
    let content = strip_prefix(text, prefixes)?;

    if let Some(caps) = period_regex().captures(content) {
        let period = Period::parse(caps.get(2)?.as_str())?;
        return Some(Command::Cloud {
            scope: scope_of(caps.get(1).map(|m| m.as_str())),
            time: TimeSpec::Period(period),
        });
    }

    if let Some(caps) = range_regex().captures(content) {
        return Some(Command::Cloud {
            scope: scope_of(caps.get(1).map(|m| m.as_str())),
            time: TimeSpec::Range {
                start: caps.get(2)?.as_str().to_string(),
                stop: caps.get(3)?.as_str().to_string(),
            },
        });
    }

    if let Some(caps) = schedule_regex().captures(content) {
        return Some(Command::SetSchedule(caps.get(1).map(|m| m.as_str().to_string())));
    }

    match content {
        "取消定时词云" => Some(Command::RemoveSchedule),
        "查看定时词云" => Some(Command::ShowSchedule),
        _ => None,
    }
}
