//! 通用异步资源池
//!
//! 借出顺序：空闲且有效的资源 → 未满 `max_size` 时新建 → 回收借出超时的资源 →
//! 池外临时创建（孤儿资源，归还时直接关闭）。

use crate::error::{Result, WordCloudError};
use async_trait::async_trait;
use log::{debug, error, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

const TARGET: &str = "WordCloud/Pool";

/// 资源工厂
#[async_trait]
pub trait ResourceFactory<T: Send + 'static>: Send + Sync + 'static {
    async fn create(&self) -> anyhow::Result<T>;

    /// 资源自身是否仍然可用
    fn is_valid(&self, _resource: &T) -> bool {
        true
    }

    async fn close(&self, _resource: T) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub max_idle: Duration,
    pub max_use_count: u64,
    /// 借出超过该时长的资源可被强制回收
    pub resource_timeout: Duration,
    pub cleanup_interval: Duration,
    /// 错误次数达到该值即视为失效
    pub max_errors: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 4,
            max_idle: Duration::from_secs(600),
            max_use_count: 1000,
            resource_timeout: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
            max_errors: 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    pub created: u64,
    pub destroyed: u64,
    pub create_failures: u64,
    pub close_failures: u64,
    pub acquired: u64,
    pub released: u64,
    pub orphaned: u64,
    pub reclaimed: u64,
    pub peak_in_use: usize,
}

struct Slot<T> {
    id: u64,
    resource: T,
    created_at: Instant,
    last_used: Instant,
    use_count: u64,
    error_count: u32,
}

struct PoolState<T> {
    idle: VecDeque<Slot<T>>,
    /// 借出中的资源 id -> 借出时间
    in_use: HashMap<u64, Instant>,
    /// 已预留名额、正在创建的数量
    pending: usize,
    /// 被强制回收的 id，归还时直接关闭
    retired: HashSet<u64>,
    metrics: PoolMetrics,
    closed: bool,
}

impl<T> PoolState<T> {
    fn tracked(&self) -> usize {
        self.idle.len() + self.in_use.len() + self.pending
    }
}

struct PoolInner<T: Send + 'static> {
    name: String,
    config: PoolConfig,
    factory: Arc<dyn ResourceFactory<T>>,
    state: Mutex<PoolState<T>>,
    next_id: AtomicU64,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> PoolInner<T> {
    fn slot_usable(&self, slot: &Slot<T>) -> bool {
        slot.error_count < self.config.max_errors
            && slot.use_count < self.config.max_use_count
            && self.factory.is_valid(&slot.resource)
    }

    /// 归还资源，返回需要关闭的资源
    fn check_in(&self, mut slot: Slot<T>, orphan: bool) -> Option<T> {
        let mut st = self.state.lock();
        st.metrics.released += 1;

        if orphan {
            return Some(slot.resource);
        }

        st.in_use.remove(&slot.id);
        if st.retired.remove(&slot.id) {
            debug!(target: TARGET, "[{}] 资源 #{} 已被回收，归还时关闭", self.name, slot.id);
            st.metrics.destroyed += 1;
            return Some(slot.resource);
        }

        if st.closed || !self.slot_usable(&slot) {
            st.metrics.destroyed += 1;
            return Some(slot.resource);
        }

        slot.last_used = Instant::now();
        st.idle.push_back(slot);
        None
    }

    async fn close_resource(&self, resource: T) {
        if let Err(e) = self.factory.close(resource).await {
            self.state.lock().metrics.close_failures += 1;
            error!(target: TARGET, "[{}] 关闭资源失败: {}", self.name, e);
        }
    }
}

/// 已预留的创建名额，未兑现的部分在 Drop 时退回
struct Reservation<'a, T: Send + 'static> {
    inner: &'a PoolInner<T>,
    count: usize,
}

impl<'a, T: Send + 'static> Reservation<'a, T> {
    fn new(inner: &'a PoolInner<T>, count: usize) -> Self {
        Self { inner, count }
    }

    /// 兑现一个名额，调用方已持有状态锁
    fn settle(&mut self, st: &mut PoolState<T>) {
        if self.count > 0 {
            self.count -= 1;
            st.pending -= 1;
        }
    }
}

impl<T: Send + 'static> Drop for Reservation<'_, T> {
    fn drop(&mut self) {
        if self.count > 0 {
            let mut st = self.inner.state.lock();
            st.pending -= self.count;
            debug!(target: TARGET, "[{}] 创建被中断，退回 {} 个名额", self.inner.name, self.count);
        }
    }
}

/// 借出的资源，Drop 时自动归还
pub struct PooledResource<T: Send + 'static> {
    pool: Arc<PoolInner<T>>,
    slot: Option<Slot<T>>,
    orphan: bool,
}

impl<T: Send + 'static> PooledResource<T> {
    /// 记录一次使用错误，累计到阈值后资源不再复用
    pub fn mark_error(&mut self) {
        if let Some(slot) = self.slot.as_mut() {
            slot.error_count += 1;
        }
    }

    pub fn is_orphan(&self) -> bool {
        self.orphan
    }

    pub fn id(&self) -> u64 {
        self.slot.as_ref().map(|s| s.id).unwrap_or_default()
    }

    pub fn age(&self) -> Duration {
        self.slot
            .as_ref()
            .map(|s| s.created_at.elapsed())
            .unwrap_or_default()
    }
}

impl<T: Send + 'static> Deref for PooledResource<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.slot.as_ref() {
            Some(slot) => &slot.resource,
            None => unreachable!("pooled resource used after release"),
        }
    }
}

impl<T: Send + 'static> DerefMut for PooledResource<T> {
    fn deref_mut(&mut self) -> &mut T {
        match self.slot.as_mut() {
            Some(slot) => &mut slot.resource,
            None => unreachable!("pooled resource used after release"),
        }
    }
}

impl<T: Send + 'static> Drop for PooledResource<T> {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        if let Some(resource) = self.pool.check_in(slot, self.orphan) {
            let pool = self.pool.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { pool.close_resource(resource).await });
                }
                Err(_) => drop(resource),
            }
        }
    }
}

enum Plan<T> {
    Reuse(Slot<T>),
    Create(u64),
    Orphan(u64),
}

/// 异步资源池
pub struct AsyncResourcePool<T: Send + 'static> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Send + 'static> Clone for AsyncResourcePool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> AsyncResourcePool<T> {
    pub fn new(
        name: impl Into<String>,
        config: PoolConfig,
        factory: impl ResourceFactory<T>,
    ) -> Self {
        let mut config = config;
        config.max_size = config.max_size.max(1);
        config.min_size = config.min_size.min(config.max_size);

        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                config,
                factory: Arc::new(factory),
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    in_use: HashMap::new(),
                    pending: 0,
                    retired: HashSet::new(),
                    metrics: PoolMetrics::default(),
                    closed: false,
                }),
                next_id: AtomicU64::new(1),
                cleanup_task: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// 预热到 `min_size`
    pub async fn initialize(&self) -> Result<()> {
        self.fill_to_min().await
    }

    pub async fn acquire(&self) -> Result<PooledResource<T>> {
        let inner = &self.inner;
        let mut stale = Vec::new();

        let plan = {
            let mut st = inner.state.lock();
            if st.closed {
                return Err(WordCloudError::Pool(format!("{} 已关闭", inner.name)));
            }

            let mut reuse = None;
            while let Some(slot) = st.idle.pop_front() {
                if inner.slot_usable(&slot) {
                    reuse = Some(slot);
                    break;
                }
                st.metrics.destroyed += 1;
                stale.push(slot.resource);
            }

            if let Some(slot) = reuse {
                Plan::Reuse(slot)
            } else if st.tracked() < inner.config.max_size {
                st.pending += 1;
                Plan::Create(inner.next_id.fetch_add(1, Ordering::SeqCst))
            } else {
                let timeout = inner.config.resource_timeout;
                let overdue = st
                    .in_use
                    .iter()
                    .filter(|(_, since)| since.elapsed() > timeout)
                    .min_by_key(|(_, since)| **since)
                    .map(|(id, _)| *id);

                match overdue {
                    Some(id) => {
                        st.in_use.remove(&id);
                        st.retired.insert(id);
                        st.metrics.reclaimed += 1;
                        st.pending += 1;
                        warn!(target: TARGET, "[{}] 资源 #{} 借出超时，已强制回收", inner.name, id);
                        Plan::Create(inner.next_id.fetch_add(1, Ordering::SeqCst))
                    }
                    None => Plan::Orphan(inner.next_id.fetch_add(1, Ordering::SeqCst)),
                }
            }
        };

        let mut reservation =
            Reservation::new(inner, usize::from(matches!(plan, Plan::Create(_))));

        for resource in stale {
            inner.close_resource(resource).await;
        }

        let now = Instant::now();
        match plan {
            Plan::Reuse(mut slot) => {
                slot.use_count += 1;
                slot.last_used = now;
                let mut st = inner.state.lock();
                st.in_use.insert(slot.id, now);
                st.metrics.acquired += 1;
                st.metrics.peak_in_use = st.metrics.peak_in_use.max(st.in_use.len());
                drop(st);
                Ok(self.guard(slot, false))
            }
            Plan::Create(id) => {
                let created = inner.factory.create().await;
                let mut st = inner.state.lock();
                reservation.settle(&mut st);
                match created {
                    Ok(resource) => {
                        st.in_use.insert(id, now);
                        st.metrics.created += 1;
                        st.metrics.acquired += 1;
                        st.metrics.peak_in_use = st.metrics.peak_in_use.max(st.in_use.len());
                        drop(st);
                        debug!(target: TARGET, "[{}] 创建资源 #{}", inner.name, id);
                        Ok(self.guard(new_slot(id, resource, 1), false))
                    }
                    Err(e) => {
                        st.metrics.create_failures += 1;
                        drop(st);
                        error!(target: TARGET, "[{}] 创建资源失败: {}", inner.name, e);
                        Err(WordCloudError::Pool(e.to_string()))
                    }
                }
            }
            Plan::Orphan(id) => {
                warn!(
                    target: TARGET,
                    "[{}] 资源池已满 ({}), 临时创建池外资源",
                    inner.name, inner.config.max_size
                );
                let resource = inner.factory.create().await.map_err(|e| {
                    inner.state.lock().metrics.create_failures += 1;
                    WordCloudError::Pool(e.to_string())
                })?;
                let mut st = inner.state.lock();
                st.metrics.orphaned += 1;
                st.metrics.acquired += 1;
                drop(st);
                Ok(self.guard(new_slot(id, resource, 1), true))
            }
        }
    }

    /// 显式归还，需要关闭的资源在当前任务中关闭
    pub async fn release(&self, mut resource: PooledResource<T>) {
        let orphan = resource.orphan;
        if let Some(slot) = resource.slot.take()
            && let Some(to_close) = self.inner.check_in(slot, orphan)
        {
            self.inner.close_resource(to_close).await;
        }
    }

    /// 清理空闲过久、失效、使用次数超限的资源，然后补足 `min_size`
    pub async fn cleanup(&self) {
        let inner = &self.inner;
        let doomed: Vec<T> = {
            let mut st = inner.state.lock();
            let max_idle = inner.config.max_idle;
            let mut keep = VecDeque::with_capacity(st.idle.len());
            let mut doomed = Vec::new();
            while let Some(slot) = st.idle.pop_front() {
                if slot.last_used.elapsed() > max_idle || !inner.slot_usable(&slot) {
                    doomed.push(slot.resource);
                } else {
                    keep.push_back(slot);
                }
            }
            st.idle = keep;
            st.metrics.destroyed += doomed.len() as u64;
            doomed
        };

        if !doomed.is_empty() {
            debug!(target: TARGET, "[{}] 清理资源 {} 个", inner.name, doomed.len());
        }
        for resource in doomed {
            inner.close_resource(resource).await;
        }

        if let Err(e) = self.fill_to_min().await {
            warn!(target: TARGET, "[{}] 补充资源失败: {}", inner.name, e);
        }
    }

    async fn fill_to_min(&self) -> Result<()> {
        let inner = &self.inner;
        let need = {
            let mut st = inner.state.lock();
            if st.closed {
                return Ok(());
            }
            let need = inner.config.min_size.saturating_sub(st.tracked());
            st.pending += need;
            need
        };
        let mut reservation = Reservation::new(inner, need);

        let mut first_err = None;
        for _ in 0..need {
            let created = inner.factory.create().await;
            let mut st = inner.state.lock();
            reservation.settle(&mut st);
            match created {
                Ok(resource) => {
                    let id = inner.next_id.fetch_add(1, Ordering::SeqCst);
                    st.idle.push_back(new_slot(id, resource, 0));
                    st.metrics.created += 1;
                }
                Err(e) => {
                    st.metrics.create_failures += 1;
                    first_err.get_or_insert(WordCloudError::Pool(e.to_string()));
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 启动后台清理循环
    pub fn start_cleanup(&self) {
        let weak: Weak<PoolInner<T>> = Arc::downgrade(&self.inner);
        let interval = self.inner.config.cleanup_interval.max(Duration::from_millis(10));

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.state.lock().closed {
                    break;
                }
                AsyncResourcePool { inner }.cleanup().await;
            }
        });

        if let Some(old) = self.inner.cleanup_task.lock().replace(handle) {
            old.abort();
        }
    }

    /// 停止清理循环并关闭所有空闲资源，借出中的资源在归还时关闭
    pub async fn shutdown(&self) {
        if let Some(handle) = self.inner.cleanup_task.lock().take() {
            handle.abort();
        }

        let idle: Vec<T> = {
            let mut st = self.inner.state.lock();
            st.closed = true;
            let idle: Vec<T> = st.idle.drain(..).map(|s| s.resource).collect();
            st.metrics.destroyed += idle.len() as u64;
            idle
        };
        for resource in idle {
            self.inner.close_resource(resource).await;
        }
    }

    /// 池内（不含孤儿）资源总数
    pub fn size(&self) -> usize {
        self.inner.state.lock().tracked()
    }

    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    pub fn in_use_count(&self) -> usize {
        self.inner.state.lock().in_use.len()
    }

    pub fn metrics(&self) -> PoolMetrics {
        self.inner.state.lock().metrics.clone()
    }

    fn guard(&self, slot: Slot<T>, orphan: bool) -> PooledResource<T> {
        PooledResource {
            pool: self.inner.clone(),
            slot: Some(slot),
            orphan,
        }
    }
}

fn new_slot<T>(id: u64, resource: T, use_count: u64) -> Slot<T> {
    let now = Instant::now();
    Slot {
        id,
        resource,
        created_at: now,
        last_used: now,
        use_count,
        error_count: 0,
    }
}
