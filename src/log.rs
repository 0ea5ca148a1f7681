use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::sync::OnceLock;

/// 控制台日志后端
/// 格式: [Time] [LEVEL] [Target] Message
struct ConsoleLogger {
    level: LevelFilter,
}

static LOGGER: OnceLock<ConsoleLogger> = OnceLock::new();

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        println!("{}", format_line(record.level(), record.target(), record.args()));
    }

    fn flush(&self) {}
}

fn format_line(level: Level, target: &str, args: &std::fmt::Arguments) -> String {
    let now = Local::now().format("%H:%M:%S");

    // ANSI 颜色代码
    let gray = "\x1b[90m";
    let reset = "\x1b[0m";
    let cyan = "\x1b[36m";

    let (color, level_str) = match level {
        Level::Info => ("\x1b[32m", "INFO"),  // Green
        Level::Warn => ("\x1b[33m", "WARN"),  // Yellow
        Level::Error => ("\x1b[31m", "ERRO"), // Red
        Level::Debug => ("\x1b[34m", "DEBG"), // Blue
        Level::Trace => ("\x1b[90m", "TRCE"),
    };

    format!(
        "{}[{}] {}[{}] {} {}[{}]{} {}",
        gray, now, color, level_str, reset, cyan, target, reset, args
    )
}

/// 解析配置中的日志级别，无法识别时回落到 info
pub fn parse_level(level: &str) -> LevelFilter {
    match level.trim().to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" | "warning" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// 安装全局日志后端，重复调用无副作用
pub fn init(level: &str) {
    let filter = parse_level(level);
    let logger = LOGGER.get_or_init(|| ConsoleLogger { level: filter });
    if log::set_logger(logger).is_ok() {
        log::set_max_level(logger.level);
    }
}
