use crate::config::write_atomic;
use crate::error::{Result, WordCloudError};
use crate::scheduler::Scheduler;
use futures_util::future::BoxFuture;
use log::{info, warn};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const TARGET: &str = "WordCloud/Schedule";
const JOB_PREFIX: &str = "word_cloud:";

/// 定时触发时调用，参数为群号
pub type ScheduleCallback = Arc<dyn Fn(i64) -> BoxFuture<'static, ()> + Send + Sync>;

/// 解析 `HH:MM`，返回 (时, 分)
pub fn parse_time(s: &str) -> Result<(u32, u32)> {
    let invalid = || WordCloudError::Schedule(format!("时间格式应为 HH:MM，收到 {:?}", s));
    let (h, m) = s.trim().split_once(|c: char| c == ':' || c == '：').ok_or_else(invalid)?;
    let hour: u32 = h.trim().parse().map_err(|_| invalid())?;
    let minute: u32 = m.trim().parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 || m.trim().len() != 2 {
        return Err(invalid());
    }
    Ok((hour, minute))
}

fn job_key(group_id: i64) -> String {
    format!("{}{}", JOB_PREFIX, group_id)
}

/// 各群每日推送时间，持久化为 `{ "群号": "HH:MM" }`
pub struct ScheduleManager {
    path: PathBuf,
    default_time: String,
    jitter: Duration,
    schedules: Mutex<BTreeMap<i64, String>>,
    /// 已注册到调度器的 群号 -> (时间, 任务序号)
    registered: parking_lot::Mutex<HashMap<i64, (String, u64)>>,
    scheduler: Arc<Scheduler>,
    callback: ScheduleCallback,
}

impl ScheduleManager {
    pub fn new(
        path: impl Into<PathBuf>,
        default_time: impl Into<String>,
        jitter: Duration,
        scheduler: Arc<Scheduler>,
        callback: ScheduleCallback,
    ) -> Self {
        Self {
            path: path.into(),
            default_time: default_time.into(),
            jitter,
            schedules: Mutex::new(BTreeMap::new()),
            registered: parking_lot::Mutex::new(HashMap::new()),
            scheduler,
            callback,
        }
    }

    /// 读取文件并注册全部任务，文件不存在视为空表
    pub async fn load(&self) -> Result<usize> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let raw: BTreeMap<String, String> = if content.is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_slice(&content)?
        };

        let mut schedules = self.schedules.lock().await;
        schedules.clear();
        for (group, time) in raw {
            match (group.parse::<i64>(), parse_time(&time)) {
                (Ok(group_id), Ok((h, m))) => {
                    schedules.insert(group_id, format!("{:02}:{:02}", h, m));
                }
                _ => warn!(target: TARGET, "忽略无效的定时配置: {} -> {}", group, time),
            }
        }

        self.sync(&schedules);
        info!(target: TARGET, "已加载 {} 个群的定时词云", schedules.len());
        Ok(schedules.len())
    }

    /// 设置推送时间，未给出时使用默认时间，返回规范化后的 `HH:MM`
    pub async fn set_schedule(&self, group_id: i64, time: Option<&str>) -> Result<String> {
        let (h, m) = parse_time(time.unwrap_or(self.default_time.as_str()))?;
        let normalized = format!("{:02}:{:02}", h, m);

        let mut schedules = self.schedules.lock().await;
        schedules.insert(group_id, normalized.clone());
        self.save(&schedules).await?;
        self.sync(&schedules);

        info!(target: TARGET, "群 {} 定时词云设为 {}", group_id, normalized);
        Ok(normalized)
    }

    pub async fn remove_schedule(&self, group_id: i64) -> Result<bool> {
        let mut schedules = self.schedules.lock().await;
        if schedules.remove(&group_id).is_none() {
            return Ok(false);
        }
        self.save(&schedules).await?;
        self.sync(&schedules);

        info!(target: TARGET, "群 {} 已取消定时词云", group_id);
        Ok(true)
    }

    pub async fn get_schedule_time(&self, group_id: i64) -> Option<String> {
        self.schedules.lock().await.get(&group_id).cloned()
    }

    pub async fn list(&self) -> Vec<(i64, String)> {
        self.schedules
            .lock()
            .await
            .iter()
            .map(|(g, t)| (*g, t.clone()))
            .collect()
    }

    async fn save(&self, schedules: &BTreeMap<i64, String>) -> Result<()> {
        let raw: BTreeMap<String, &String> =
            schedules.iter().map(|(g, t)| (g.to_string(), t)).collect();
        let content = serde_json::to_vec_pretty(&raw)?;
        write_atomic(self.path.clone(), content).await?;
        Ok(())
    }

    /// 让调度器中的任务与表一致，只改动新增、变更和已删除的群
    fn sync(&self, schedules: &BTreeMap<i64, String>) {
        let mut registered = self.registered.lock();

        for key in self.scheduler.keys() {
            let stale = key
                .strip_prefix(JOB_PREFIX)
                .and_then(|g| g.parse::<i64>().ok())
                .is_some_and(|g| !schedules.contains_key(&g));
            if stale {
                self.scheduler.remove(&key);
            }
        }
        registered.retain(|g, _| schedules.contains_key(g));

        for (group_id, time) in schedules {
            let key = job_key(*group_id);
            let unchanged = registered
                .get(group_id)
                .is_some_and(|(t, seq)| t == time && self.scheduler.job_seq(&key) == Some(*seq));
            if unchanged {
                continue;
            }

            let Ok((hour, minute)) = parse_time(time) else {
                continue;
            };
            let callback = self.callback.clone();
            let group_id = *group_id;
            let seq = self
                .scheduler
                .add_daily_at(key, hour, minute, self.jitter, move || callback(group_id));
            registered.insert(group_id, (time.clone(), seq));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::word_cloud::time::fixed_offset;
    use futures_util::FutureExt;

    fn manager(path: PathBuf, scheduler: Arc<Scheduler>) -> ScheduleManager {
        let callback: ScheduleCallback = Arc::new(|_group: i64| async {}.boxed());
        ScheduleManager::new(path, "22:00", Duration::from_secs(300), scheduler, callback)
    }

    #[test]
    fn parses_clock_times() {
        assert_eq!(parse_time("09:30").unwrap(), (9, 30));
        assert_eq!(parse_time("9:05").unwrap(), (9, 5));
        assert_eq!(parse_time("23：59").unwrap(), (23, 59));
        assert!(parse_time("24:00").is_err());
        assert!(parse_time("12:5").is_err());
        assert!(parse_time("noon").is_err());
    }

    #[tokio::test]
    async fn set_get_remove_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.json");
        let scheduler = Arc::new(Scheduler::new(fixed_offset(8)));
        let sm = manager(path.clone(), scheduler.clone());

        assert_eq!(sm.set_schedule(1001, Some("9:30")).await.unwrap(), "09:30");
        assert_eq!(sm.get_schedule_time(1001).await.as_deref(), Some("09:30"));
        assert!(scheduler.contains("word_cloud:1001"));

        let saved: BTreeMap<String, String> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(saved.get("1001").map(String::as_str), Some("09:30"));

        assert!(sm.remove_schedule(1001).await.unwrap());
        assert_eq!(sm.get_schedule_time(1001).await, None);
        assert!(!scheduler.contains("word_cloud:1001"));
        assert!(!sm.remove_schedule(1001).await.unwrap());
    }

    #[tokio::test]
    async fn default_time_and_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(Scheduler::new(fixed_offset(8)));
        let sm = manager(dir.path().join("s.json"), scheduler);

        assert_eq!(sm.set_schedule(7, None).await.unwrap(), "22:00");
        let err = sm.set_schedule(7, Some("25:00")).await.unwrap_err();
        assert!(matches!(err, WordCloudError::Schedule(_)));
        assert_eq!(sm.get_schedule_time(7).await.as_deref(), Some("22:00"));
    }

    #[tokio::test]
    async fn reload_restores_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.json");
        std::fs::write(&path, r#"{"1": "08:00", "2": "bad", "x": "10:00"}"#).unwrap();

        let scheduler = Arc::new(Scheduler::new(fixed_offset(8)));
        scheduler.add_daily_at("word_cloud:99", 1, 0, Duration::ZERO, || async {});
        scheduler.add_daily_at("other", 1, 0, Duration::ZERO, || async {});

        let sm = manager(path, scheduler.clone());
        assert_eq!(sm.load().await.unwrap(), 1);
        assert_eq!(sm.list().await, vec![(1, "08:00".to_string())]);
        assert_eq!(scheduler.keys(), vec!["other", "word_cloud:1"]);
    }

    #[tokio::test]
    async fn mutation_leaves_other_groups_jobs_alone() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(Scheduler::new(fixed_offset(8)));
        let sm = manager(dir.path().join("s.json"), scheduler.clone());

        sm.set_schedule(1, Some("09:30")).await.unwrap();
        let b = scheduler.job_seq("word_cloud:1").unwrap();

        sm.set_schedule(2, Some("10:00")).await.unwrap();
        assert_eq!(scheduler.job_seq("word_cloud:1"), Some(b));
        let a = scheduler.job_seq("word_cloud:2").unwrap();

        // 同一时间重复设置不重建任务
        sm.set_schedule(2, Some("10:00")).await.unwrap();
        assert_eq!(scheduler.job_seq("word_cloud:2"), Some(a));

        sm.set_schedule(2, Some("11:00")).await.unwrap();
        assert_ne!(scheduler.job_seq("word_cloud:2"), Some(a));
        assert_eq!(scheduler.job_seq("word_cloud:1"), Some(b));

        sm.remove_schedule(2).await.unwrap();
        assert_eq!(scheduler.job_seq("word_cloud:1"), Some(b));
        assert!(!scheduler.contains("word_cloud:2"));
    }
}
