//! 工作记忆：每个 (Agent, 会话) 最近 H 轮 (user, assistant) 对
//!
//! 窗口长度始终 ≤ 2H，超出时从最旧端剪枝；进程内缓存，首次使用时由调用方从持久化消息回填。

use std::collections::HashMap;
use std::sync::Mutex;

use crate::memory::Message;

/// 单个窗口：实际保留 history_pairs*2 条消息
#[derive(Clone, Debug)]
pub struct WorkingMemoryWindow {
    messages: Vec<Message>,
    history_pairs: usize,
}

impl WorkingMemoryWindow {
    pub fn new(history_pairs: usize) -> Self {
        Self {
            messages: Vec::new(),
            history_pairs,
        }
    }

    /// 由若干历史 (user, assistant) 对构建，只保留最后 H 对
    pub fn from_exchanges<I>(history_pairs: usize, exchanges: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut window = Self::new(history_pairs);
        for (user, assistant) in exchanges {
            window.push_exchange(user, assistant);
        }
        window
    }

    pub fn push_exchange(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.messages.push(Message::user(user));
        self.messages.push(Message::assistant(assistant));
        self.prune();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.history_pairs * 2
    }

    /// 超出 2H 时丢弃最旧的消息
    fn prune(&mut self) {
        let keep = self.capacity();
        if self.messages.len() > keep {
            self.messages.drain(..self.messages.len() - keep);
        }
    }
}

/// 窗口注册表：键为 (agent, conversation_id)
///
/// 最多保留 `max_windows` 个窗口，超出时淘汰最久未使用的那个；
/// 被淘汰的窗口下次使用时会从持久化消息重新回填。
#[derive(Debug)]
pub struct WorkingMemory {
    history_pairs: usize,
    max_windows: usize,
    inner: Mutex<Registry>,
}

#[derive(Debug, Default)]
struct Registry {
    windows: HashMap<(String, String), Slot>,
    tick: u64,
}

#[derive(Debug)]
struct Slot {
    window: WorkingMemoryWindow,
    last_used: u64,
}

impl Registry {
    fn touch(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn evict_over(&mut self, max_windows: usize) {
        while self.windows.len() > max_windows {
            let oldest = self
                .windows
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    self.windows.remove(&key);
                    tracing::debug!("Evicted working memory window {}/{}", key.0, key.1);
                }
                None => break,
            }
        }
    }
}

impl WorkingMemory {
    pub fn new(history_pairs: usize, max_windows: usize) -> Self {
        Self {
            history_pairs,
            max_windows: max_windows.max(1),
            inner: Mutex::new(Registry::default()),
        }
    }

    fn key(agent: &str, conversation_id: &str) -> (String, String) {
        (agent.to_string(), conversation_id.to_string())
    }

    /// 已缓存时返回窗口内容；未缓存返回 None（调用方应回填）
    pub fn snapshot(&self, agent: &str, conversation_id: &str) -> Option<Vec<Message>> {
        let mut inner = self.inner.lock().ok()?;
        let now = inner.touch();
        let slot = inner.windows.get_mut(&Self::key(agent, conversation_id))?;
        slot.last_used = now;
        Some(slot.window.messages().to_vec())
    }

    /// 用历史 exchange 回填；若并发下已有窗口则保留已有的
    pub fn hydrate<I>(&self, agent: &str, conversation_id: &str, exchanges: I) -> Vec<Message>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let fresh = WorkingMemoryWindow::from_exchanges(self.history_pairs, exchanges);
        let Ok(mut inner) = self.inner.lock() else {
            return fresh.messages().to_vec();
        };
        let now = inner.touch();
        let slot = inner
            .windows
            .entry(Self::key(agent, conversation_id))
            .or_insert(Slot {
                window: fresh,
                last_used: now,
            });
        slot.last_used = now;
        let messages = slot.window.messages().to_vec();
        inner.evict_over(self.max_windows);
        messages
    }

    /// 本轮成功回复后追加 (user, assistant) 对并剪枝
    pub fn record_exchange(&self, agent: &str, conversation_id: &str, user: &str, assistant: &str) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let now = inner.touch();
        let history_pairs = self.history_pairs;
        let slot = inner
            .windows
            .entry(Self::key(agent, conversation_id))
            .or_insert_with(|| Slot {
                window: WorkingMemoryWindow::new(history_pairs),
                last_used: now,
            });
        slot.last_used = now;
        slot.window.push_exchange(user, assistant);
        inner.evict_over(self.max_windows);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.windows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.windows.clear();
        }
    }
}
