use crate::error::{Result, WordCloudError};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};

/// 口语化的时间范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    Last7Days,
    Last30Days,
    ThisMonth,
    LastMonth,
    ThisQuarter,
    ThisYear,
    LastYear,
    All,
}

impl Period {
    pub const ALL: [Period; 12] = [
        Period::Today,
        Period::Yesterday,
        Period::ThisWeek,
        Period::LastWeek,
        Period::Last7Days,
        Period::Last30Days,
        Period::ThisMonth,
        Period::LastMonth,
        Period::ThisQuarter,
        Period::ThisYear,
        Period::LastYear,
        Period::All,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        let p = match s.trim() {
            "今日" | "今天" => Period::Today,
            "昨日" | "昨天" => Period::Yesterday,
            "本周" => Period::ThisWeek,
            "上周" => Period::LastWeek,
            "近7天" => Period::Last7Days,
            "近30天" => Period::Last30Days,
            "本月" => Period::ThisMonth,
            "上月" => Period::LastMonth,
            "本季" | "本季度" => Period::ThisQuarter,
            "今年" | "年度" => Period::ThisYear,
            "去年" => Period::LastYear,
            "总" | "历史" => Period::All,
            _ => return None,
        };
        Some(p)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Period::Today => "今日",
            Period::Yesterday => "昨日",
            Period::ThisWeek => "本周",
            Period::LastWeek => "上周",
            Period::Last7Days => "近7天",
            Period::Last30Days => "近30天",
            Period::ThisMonth => "本月",
            Period::LastMonth => "上月",
            Period::ThisQuarter => "本季",
            Period::ThisYear => "今年",
            Period::LastYear => "去年",
            Period::All => "总",
        }
    }
}

/// 绝对时间范围，左闭右开
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<FixedOffset>,
    pub stop: DateTime<FixedOffset>,
}

impl TimeRange {
    pub fn start_ts(&self) -> i64 {
        self.start.timestamp()
    }

    pub fn stop_ts(&self) -> i64 {
        self.stop.timestamp()
    }

    pub fn span(&self) -> Duration {
        self.stop - self.start
    }
}

/// 构造固定时区，越界时回落到 UTC+8
pub fn fixed_offset(hours: i32) -> FixedOffset {
    FixedOffset::east_opt(hours * 3600)
        .or_else(|| FixedOffset::east_opt(8 * 3600))
        .unwrap_or_else(|| Utc.fix())
}

/// 指定时区下的当前时间
pub fn now_in(tz: FixedOffset) -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&tz)
}

fn midnight(tz: &FixedOffset, date: NaiveDate) -> DateTime<FixedOffset> {
    let local = date.and_time(NaiveTime::MIN);
    let utc = local - Duration::seconds(tz.local_minus_utc() as i64);
    utc.and_utc().with_timezone(tz)
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

fn prev_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

/// 根据口语化时间描述计算绝对时间范围
///
/// `now` 由调用方注入，便于测试与定时任务使用同一时刻。
pub fn resolve_period(period: Period, now: DateTime<FixedOffset>) -> TimeRange {
    let tz = *now.offset();
    let today = now.date_naive();
    let today_start = midnight(&tz, today);

    let (start, stop) = match period {
        Period::Today => (today_start, now),
        Period::Yesterday => (today_start - Duration::days(1), today_start),
        Period::ThisWeek => {
            let weekday = now.weekday().num_days_from_monday() as i64;
            (today_start - Duration::days(weekday), now)
        }
        Period::LastWeek => {
            let weekday = now.weekday().num_days_from_monday() as i64;
            let this_week_start = today_start - Duration::days(weekday);
            (this_week_start - Duration::days(7), this_week_start)
        }
        Period::Last7Days => (now - Duration::days(7), now),
        Period::Last30Days => (now - Duration::days(30), now),
        Period::ThisMonth => (midnight(&tz, first_of_month(today.year(), today.month())), now),
        Period::LastMonth => {
            let this_month = midnight(&tz, first_of_month(today.year(), today.month()));
            let (y, m) = prev_month(today.year(), today.month());
            (midnight(&tz, first_of_month(y, m)), this_month)
        }
        Period::ThisQuarter => {
            let q_month = (today.month0() / 3) * 3 + 1;
            (midnight(&tz, first_of_month(today.year(), q_month)), now)
        }
        Period::ThisYear => (midnight(&tz, first_of_month(today.year(), 1)), now),
        Period::LastYear => {
            let this_year = midnight(&tz, first_of_month(today.year(), 1));
            (midnight(&tz, first_of_month(today.year() - 1, 1)), this_year)
        }
        Period::All => (DateTime::<Utc>::UNIX_EPOCH.with_timezone(&tz), now),
    };

    TimeRange { start, stop }
}

/// 解析日期字面量，支持 `YYYY-MM-DD` / `YYYY/MM/DD` / `YYYYMMDD`
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// 按日期区间计算时间范围，结束日期包含在内
pub fn resolve_date_range(start: &str, stop: &str, tz: FixedOffset) -> Result<TimeRange> {
    let start_date = parse_date(start)
        .ok_or_else(|| WordCloudError::InvalidArgs(format!("无法识别的日期: {}", start)))?;
    let stop_date = parse_date(stop)
        .ok_or_else(|| WordCloudError::InvalidArgs(format!("无法识别的日期: {}", stop)))?;

    if start_date > stop_date {
        return Err(WordCloudError::InvalidArgs(
            "开始日期晚于结束日期".to_string(),
        ));
    }

    let next_day = stop_date
        .succ_opt()
        .ok_or_else(|| WordCloudError::InvalidArgs(format!("日期越界: {}", stop)))?;

    Ok(TimeRange {
        start: midnight(&tz, start_date),
        stop: midnight(&tz, next_day),
    })
}
