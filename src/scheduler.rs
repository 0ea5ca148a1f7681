use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveTime, Utc};
use log::{debug, info};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::AbortHandle;

const TARGET: &str = "WordCloud/Schedule";

/// 计算某时区下下一次 `HH:MM` 的时刻，今天已过则取明天
pub fn next_daily_run(
    now: DateTime<FixedOffset>,
    hour: u32,
    minute: u32,
) -> Option<DateTime<FixedOffset>> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    let tz = *now.offset();
    let today = now.date_naive();

    let at = |date: chrono::NaiveDate| {
        let local = date.and_time(time);
        (local - ChronoDuration::seconds(tz.local_minus_utc() as i64))
            .and_utc()
            .with_timezone(&tz)
    };

    let target_today = at(today);
    if target_today > now {
        return Some(target_today);
    }
    today.succ_opt().map(at)
}

struct Job {
    seq: u64,
    handle: AbortHandle,
}

/// 按键管理的定时任务
pub struct Scheduler {
    tasks: Mutex<HashMap<String, Job>>,
    next_seq: AtomicU64,
    tz: FixedOffset,
}

impl Scheduler {
    pub fn new(tz: FixedOffset) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
            tz,
        }
    }

    /// 添加一个灵活调度任务，同名任务会被替换
    ///
    /// # 参数
    /// - `next_run_calculator`: 接收当前时间，返回下一次执行时间。返回 None 时任务停止。
    /// - `task_gen`: 任务生成闭包。
    ///
    /// 返回任务序号，每次注册都不同
    pub fn add_schedule<C, F, Fut>(
        &self,
        key: impl Into<String>,
        mut next_run_calculator: C,
        mut task_gen: F,
    ) -> u64
    where
        C: FnMut(DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let tz = self.tz;

        // 首次计算执行时间
        let mut next_time = next_run_calculator(Utc::now().with_timezone(&tz));
        if let Some(t) = next_time {
            debug!(target: TARGET, "任务 {} 下次执行: {}", key, t.format("%Y-%m-%d %H:%M:%S"));
        }

        let handle = tokio::spawn(async move {
            while let Some(target_time) = next_time {
                let now = Utc::now().with_timezone(&tz);

                // 计算需要 sleep 多久
                if target_time > now {
                    let duration = (target_time - now).to_std().unwrap_or(Duration::ZERO);
                    tokio::time::sleep(duration).await;
                }

                task_gen().await;

                next_time = next_run_calculator(Utc::now().with_timezone(&tz));
            }
        });

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let job = Job {
            seq,
            handle: handle.abort_handle(),
        };
        let old = self.tasks.lock().insert(key, job);
        if let Some(old) = old {
            old.handle.abort();
        }
        seq
    }

    /// 每天固定时间执行，每次在 `[0, jitter]` 内随机推迟，避免多个群同时触发
    pub fn add_daily_at<F, Fut>(
        &self,
        key: impl Into<String>,
        hour: u32,
        minute: u32,
        jitter: Duration,
        task_gen: F,
    ) -> u64
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let jitter_secs = jitter.as_secs();
        self.add_schedule(
            key,
            move |now| {
                let base = next_daily_run(now, hour, minute)?;
                let delay = if jitter_secs > 0 {
                    rand::rng().random_range(0..=jitter_secs)
                } else {
                    0
                };
                Some(base + ChronoDuration::seconds(delay as i64))
            },
            task_gen,
        )
    }

    pub fn remove(&self, key: &str) -> bool {
        match self.tasks.lock().remove(key) {
            Some(job) => {
                job.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.tasks.lock().contains_key(key)
    }

    /// 当前注册在该键下的任务序号
    pub fn job_seq(&self, key: &str) -> Option<u64> {
        self.tasks.lock().get(key).map(|job| job.seq)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.tasks.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock();
        info!(target: TARGET, "正在清理定时任务 ({})...", tasks.len());
        for (_, job) in tasks.drain() {
            job.handle.abort();
        }
    }
}
