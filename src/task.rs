use crate::config::WordCloudConfig;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle};

const TARGET: &str = "WordCloud/Task";

pub const CANCELLED: &str = "已取消";

type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

/// 数值越小越先执行
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskPriority {
    High = 0,
    Normal = 1,
    Low = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout
        )
    }
}

#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub id: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub timeout: Duration,
    pub created_at: Instant,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TaskManagerConfig {
    pub max_concurrent: usize,
    pub max_queue_size: usize,
    pub default_timeout: Duration,
    pub max_completed: usize,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            max_queue_size: 50,
            default_timeout: Duration::from_secs(120),
            max_completed: 200,
        }
    }
}

impl TaskManagerConfig {
    pub fn from_config(cfg: &WordCloudConfig) -> Self {
        Self {
            max_concurrent: cfg.max_concurrent_tasks.max(1),
            max_queue_size: cfg.max_queue_size.max(1),
            default_timeout: Duration::from_secs(cfg.task_timeout_secs.max(1)),
            max_completed: cfg.max_completed_tasks,
        }
    }
}

struct Queued {
    priority: TaskPriority,
    seq: u64,
    id: String,
    fut: TaskFuture,
}

// BinaryHeap 是大顶堆，反转比较使 (priority, seq) 最小者先出
impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.priority, other.seq).cmp(&(self.priority, self.seq))
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Queued {}

#[derive(Default)]
struct State {
    queue: BinaryHeap<Queued>,
    pending: HashMap<String, TaskInfo>,
    running: HashMap<String, (TaskInfo, AbortHandle)>,
    completed: HashMap<String, TaskInfo>,
    completed_order: VecDeque<String>,
    seq: u64,
    closed: bool,
}

impl State {
    fn record(&mut self, mut info: TaskInfo, max_completed: usize) {
        info.finished_at = Some(Instant::now());
        if self.completed.contains_key(&info.id) {
            self.completed_order.retain(|k| k != &info.id);
        }
        self.completed_order.push_back(info.id.clone());
        self.completed.insert(info.id.clone(), info);

        while self.completed.len() > max_completed {
            match self.completed_order.pop_front() {
                Some(old) => {
                    self.completed.remove(&old);
                }
                None => break,
            }
        }
    }
}

struct Inner {
    config: TaskManagerConfig,
    state: Mutex<State>,
    notify: Notify,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

/// 带优先级与并发上限的任务队列
///
/// 超时只结束管理器的等待，任务本身会在后台继续执行直到完成。
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl TaskManager {
    pub fn new(config: TaskManagerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                supervisor: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &TaskManagerConfig {
        &self.inner.config
    }

    /// 启动调度循环，重复调用无效
    pub fn start(&self) {
        let mut supervisor = self.inner.supervisor.lock();
        if supervisor.is_some() {
            return;
        }
        let inner = self.inner.clone();
        *supervisor = Some(tokio::spawn(async move { inner.supervise().await }));
        info!(
            target: TARGET,
            "任务管理器已启动 (并发上限 {}, 队列上限 {})",
            self.inner.config.max_concurrent,
            self.inner.config.max_queue_size
        );
    }

    /// 入队，队列已满、ID 重复或已关闭时返回 false
    pub fn add_task<F>(
        &self,
        id: impl Into<String>,
        fut: F,
        priority: TaskPriority,
        timeout: Option<Duration>,
    ) -> bool
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = id.into();
        let mut state = self.inner.state.lock();

        if state.closed {
            warn!(target: TARGET, "任务管理器已关闭，拒绝任务 {}", id);
            return false;
        }
        if state.pending.contains_key(&id) || state.running.contains_key(&id) {
            debug!(target: TARGET, "任务 {} 已在队列中", id);
            return false;
        }
        if state.queue.len() >= self.inner.config.max_queue_size {
            warn!(target: TARGET, "任务队列已满 ({})，拒绝任务 {}", state.queue.len(), id);
            return false;
        }

        state.seq += 1;
        let seq = state.seq;
        state.pending.insert(
            id.clone(),
            TaskInfo {
                id: id.clone(),
                priority,
                status: TaskStatus::Pending,
                timeout: timeout.unwrap_or(self.inner.config.default_timeout),
                created_at: Instant::now(),
                started_at: None,
                finished_at: None,
                error: None,
            },
        );
        state.queue.push(Queued {
            priority,
            seq,
            id,
            fut: Box::pin(fut),
        });
        drop(state);

        self.inner.notify.notify_one();
        true
    }

    /// 取消任务：排队中的直接移除，运行中的中止
    pub fn cancel_task(&self, id: &str) -> bool {
        let max_completed = self.inner.config.max_completed;
        let mut state = self.inner.state.lock();

        if let Some(mut info) = state.pending.remove(id) {
            state.queue.retain(|q| q.id != id);
            info.status = TaskStatus::Failed;
            info.error = Some(CANCELLED.to_string());
            state.record(info, max_completed);
            info!(target: TARGET, "已取消排队任务 {}", id);
            return true;
        }

        if let Some((mut info, handle)) = state.running.remove(id) {
            handle.abort();
            info.status = TaskStatus::Failed;
            info.error = Some(CANCELLED.to_string());
            state.record(info, max_completed);
            drop(state);
            self.inner.notify.notify_one();
            info!(target: TARGET, "已中止运行中任务 {}", id);
            return true;
        }

        false
    }

    pub fn get_task_status(&self, id: &str) -> Option<TaskInfo> {
        let state = self.inner.state.lock();
        state
            .pending
            .get(id)
            .or_else(|| state.running.get(id).map(|(info, _)| info))
            .or_else(|| state.completed.get(id))
            .cloned()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn running_count(&self) -> usize {
        self.inner.state.lock().running.len()
    }

    /// 关闭任务管理器
    ///
    /// `drain` 为 true 时等待排队与运行中的任务结束，否则全部取消。
    pub async fn shutdown(&self, drain: bool) {
        {
            let max_completed = self.inner.config.max_completed;
            let mut state = self.inner.state.lock();
            state.closed = true;

            if !drain {
                let queued: Vec<Queued> = state.queue.drain().collect();
                for q in queued {
                    if let Some(mut info) = state.pending.remove(&q.id) {
                        info.status = TaskStatus::Failed;
                        info.error = Some(CANCELLED.to_string());
                        state.record(info, max_completed);
                    }
                }
                let running: Vec<(TaskInfo, AbortHandle)> =
                    state.running.drain().map(|(_, v)| v).collect();
                for (mut info, handle) in running {
                    handle.abort();
                    info.status = TaskStatus::Failed;
                    info.error = Some(CANCELLED.to_string());
                    state.record(info, max_completed);
                }
            }
        }

        // 未启动过也要把队列跑完
        if drain {
            self.start();
        }
        self.inner.notify.notify_one();

        let handle = self.inner.supervisor.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(target: TARGET, "调度循环异常退出: {}", e);
        }
        info!(target: TARGET, "任务管理器已关闭");
    }
}

impl Inner {
    async fn supervise(self: Arc<Self>) {
        loop {
            let next = {
                let mut state = self.state.lock();
                if state.closed && state.queue.is_empty() && state.running.is_empty() {
                    break;
                }
                if state.running.len() < self.config.max_concurrent {
                    state.queue.pop()
                } else {
                    None
                }
            };

            match next {
                Some(task) => self.dispatch(task),
                None => self.notify.notified().await,
            }
        }
        debug!(target: TARGET, "调度循环结束");
    }

    fn dispatch(self: &Arc<Self>, task: Queued) {
        let Queued { id, fut, .. } = task;

        let (handle, timeout) = {
            let mut state = self.state.lock();
            // 出队后可能已被取消，此时不再启动
            let Some(mut info) = state.pending.remove(&id) else {
                debug!(target: TARGET, "任务 {} 已取消，跳过", id);
                return;
            };
            let handle = tokio::spawn(fut);
            info.status = TaskStatus::Running;
            info.started_at = Some(Instant::now());
            let timeout = info.timeout;
            state.running.insert(id.clone(), (info, handle.abort_handle()));
            (handle, timeout)
        };
        debug!(target: TARGET, "开始执行任务 {}", id);

        let inner = self.clone();
        tokio::spawn(async move {
            // 超时后丢弃 JoinHandle，任务脱离管理继续运行
            let (status, error) = match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(Ok(()))) => (TaskStatus::Completed, None),
                Ok(Ok(Err(e))) => (TaskStatus::Failed, Some(format!("{:#}", e))),
                Ok(Err(e)) if e.is_cancelled() => (TaskStatus::Failed, Some(CANCELLED.to_string())),
                Ok(Err(e)) => (TaskStatus::Failed, Some(format!("任务崩溃: {}", e))),
                Err(_) => (TaskStatus::Timeout, Some(format!("超过 {:?} 未完成", timeout))),
            };
            inner.finish(&id, status, error);
        });
    }

    fn finish(&self, id: &str, status: TaskStatus, error: Option<String>) {
        {
            let mut state = self.state.lock();
            // 取消时已经记录过
            let Some((mut info, _)) = state.running.remove(id) else {
                return;
            };
            info.status = status;
            info.error = error;

            match status {
                TaskStatus::Completed => debug!(target: TARGET, "任务 {} 完成", id),
                TaskStatus::Timeout => warn!(target: TARGET, "任务 {} 超时，后台继续运行", id),
                _ => warn!(
                    target: TARGET,
                    "任务 {} 失败: {}",
                    id,
                    info.error.as_deref().unwrap_or("")
                ),
            }
            state.record(info, self.config.max_completed);
        }
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    fn manager(max_concurrent: usize, max_queue_size: usize) -> TaskManager {
        TaskManager::new(TaskManagerConfig {
            max_concurrent,
            max_queue_size,
            default_timeout: Duration::from_secs(5),
            max_completed: 10,
        })
    }

    async fn wait_status(tm: &TaskManager, id: &str, status: TaskStatus) -> TaskInfo {
        for _ in 0..200 {
            if let Some(info) = tm.get_task_status(id)
                && info.status == status
            {
                return info;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {} never reached {:?}", id, status);
    }

    #[tokio::test]
    async fn runs_by_priority_then_fifo() {
        let tm = manager(1, 10);
        let order = Arc::new(Mutex::new(Vec::new()));

        for (id, priority) in [
            ("low", TaskPriority::Low),
            ("normal-1", TaskPriority::Normal),
            ("high", TaskPriority::High),
            ("normal-2", TaskPriority::Normal),
        ] {
            let order = order.clone();
            assert!(tm.add_task(
                id,
                async move {
                    order.lock().push(id);
                    Ok(())
                },
                priority,
                None,
            ));
        }

        tm.start();
        tm.shutdown(true).await;
        assert_eq!(*order.lock(), vec!["high", "normal-1", "normal-2", "low"]);
        assert_eq!(tm.get_task_status("low").unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn never_exceeds_concurrency_limit() {
        let tm = manager(2, 20);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..6 {
            let current = current.clone();
            let peak = peak.clone();
            tm.add_task(
                format!("t{}", i),
                async move {
                    let now = current.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                    peak.fetch_max(now, std::sync::atomic::Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    current.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(())
                },
                TaskPriority::Normal,
                None,
            );
        }

        tm.start();
        tm.shutdown(true).await;
        assert!(peak.load(std::sync::atomic::Ordering::SeqCst) <= 2);
        for i in 0..6 {
            let info = tm.get_task_status(&format!("t{}", i)).unwrap();
            assert_eq!(info.status, TaskStatus::Completed);
        }
    }

    #[tokio::test]
    async fn timeout_does_not_stop_the_task() {
        let tm = manager(1, 10);
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        tm.start();
        tm.add_task(
            "slow",
            async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            },
            TaskPriority::Normal,
            Some(Duration::from_millis(20)),
        );

        let info = wait_status(&tm, "slow", TaskStatus::Timeout).await;
        assert!(info.error.is_some());
        assert!(!finished.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(tm.running_count(), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(finished.load(std::sync::atomic::Ordering::SeqCst));
        tm.shutdown(true).await;
    }

    #[tokio::test]
    async fn cancels_pending_and_running_tasks() {
        let tm = manager(1, 10);
        let gate = Arc::new(Notify::new());

        let g = gate.clone();
        tm.add_task(
            "blocker",
            async move {
                g.notified().await;
                Ok(())
            },
            TaskPriority::High,
            None,
        );
        tm.add_task("queued", async { Ok(()) }, TaskPriority::Low, None);
        tm.start();

        wait_status(&tm, "blocker", TaskStatus::Running).await;
        assert_eq!(tm.get_task_status("queued").unwrap().status, TaskStatus::Pending);

        assert!(tm.cancel_task("queued"));
        let info = tm.get_task_status("queued").unwrap();
        assert_eq!(info.status, TaskStatus::Failed);
        assert_eq!(info.error.as_deref(), Some(CANCELLED));
        assert_eq!(tm.queue_len(), 0);

        assert!(tm.cancel_task("blocker"));
        assert_eq!(tm.get_task_status("blocker").unwrap().status, TaskStatus::Failed);
        assert!(!tm.cancel_task("missing"));

        tm.shutdown(true).await;
    }

    #[tokio::test]
    async fn task_cancelled_after_dequeue_never_starts() {
        let tm = manager(1, 10);
        let started = Arc::new(AtomicBool::new(false));
        let flag = started.clone();
        tm.add_task(
            "late-cancel",
            async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            },
            TaskPriority::Normal,
            None,
        );

        let task = tm.inner.state.lock().queue.pop().unwrap();
        assert!(tm.cancel_task("late-cancel"));
        tm.inner.dispatch(task);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!started.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(tm.running_count(), 0);
        let info = tm.get_task_status("late-cancel").unwrap();
        assert_eq!(info.error.as_deref(), Some(CANCELLED));
    }

    #[tokio::test]
    async fn rejects_when_full_or_duplicated() {
        let tm = manager(1, 2);
        assert!(tm.add_task("a", async { Ok(()) }, TaskPriority::Normal, None));
        assert!(!tm.add_task("a", async { Ok(()) }, TaskPriority::Normal, None));
        assert!(tm.add_task("b", async { Ok(()) }, TaskPriority::Normal, None));
        assert!(!tm.add_task("c", async { Ok(()) }, TaskPriority::Normal, None));

        tm.shutdown(false).await;
        assert!(!tm.add_task("d", async { Ok(()) }, TaskPriority::Normal, None));
        assert_eq!(tm.get_task_status("a").unwrap().error.as_deref(), Some(CANCELLED));
    }

    #[tokio::test]
    async fn records_errors_and_bounds_history() {
        let tm = TaskManager::new(TaskManagerConfig {
            max_concurrent: 1,
            max_queue_size: 10,
            default_timeout: Duration::from_secs(5),
            max_completed: 2,
        });

        tm.add_task("ok-1", async { Ok(()) }, TaskPriority::Normal, None);
        tm.add_task(
            "err",
            async { Err(anyhow::anyhow!("boom")) },
            TaskPriority::Normal,
            None,
        );
        tm.add_task("ok-2", async { Ok(()) }, TaskPriority::Normal, None);
        tm.start();
        tm.shutdown(true).await;

        assert!(tm.get_task_status("ok-1").is_none());
        let err = tm.get_task_status("err").unwrap();
        assert_eq!(err.status, TaskStatus::Failed);
        assert_eq!(err.error.as_deref(), Some("boom"));
        assert_eq!(tm.get_task_status("ok-2").unwrap().status, TaskStatus::Completed);
    }
}
