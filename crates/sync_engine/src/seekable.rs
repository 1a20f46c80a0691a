//! Seekable Buffer
//!
//! 为只能前进的数据源提供有界回看能力，用于回放的暂停/单步/后退。
//!
//! 状态：
//! - `next_index`: 下一个要交付的序号
//! - `read_index`: 最近一次放入缓存的序号（这里用 `produced = read_index + 1` 表示）
//! - 容量为 `maxlen` 的环形缓存，保存最近产生的元素
//!
//! 不变量：`(read_index - cache_len) < next_index <= read_index + 1`

use ringbuf::{traits::*, HeapRb};

/// 跳转结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOutcome {
    /// `next_index` 已设置为目标
    Ready,
    /// 目标已被挤出缓存，状态未改变
    Evicted,
    /// 数据源在到达目标之前结束
    Exhausted,
}

impl SeekOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeekOutcome::Ready => "ready",
            SeekOutcome::Evicted => "evicted",
            SeekOutcome::Exhausted => "exhausted",
        }
    }
}

pub struct Seekable<I: Iterator> {
    source: I,
    cache: HeapRb<I::Item>,
    /// Items pulled from the source so far
    produced: usize,
    next_index: usize,
}

impl<I> Seekable<I>
where
    I: Iterator,
    I::Item: Clone,
{
    /// `maxlen` 为 0 时按 1 处理
    pub fn new(source: I, maxlen: usize) -> Self {
        Self {
            source,
            cache: HeapRb::new(maxlen.max(1)),
            produced: 0,
            next_index: 0,
        }
    }

    #[inline]
    pub fn next_index(&self) -> usize {
        self.next_index
    }

    /// 最近放入缓存的序号，尚未产生任何元素时为 `None`
    #[inline]
    pub fn read_index(&self) -> Option<usize> {
        self.produced.checked_sub(1)
    }

    #[inline]
    pub fn cache_len(&self) -> usize {
        self.cache.occupied_len()
    }

    /// Oldest index still held in the cache
    #[inline]
    fn oldest(&self) -> usize {
        self.produced - self.cache_len()
    }

    /// `(read_index - cache_len) < next_index <= read_index + 1`
    pub fn invariant_holds(&self) -> bool {
        self.oldest() <= self.next_index && self.next_index <= self.produced
    }

    /// 交付 `next_index` 处的元素：缓存命中则直接返回，否则从数据源拉取
    pub fn advance(&mut self) -> Option<I::Item> {
        if self.next_index < self.produced {
            let item = self.cache.iter().nth(self.next_index - self.oldest()).cloned();
            self.next_index += 1;
            return item;
        }
        let item = self.source.next()?;
        self.cache.push_overwrite(item.clone());
        self.produced += 1;
        self.next_index += 1;
        Some(item)
    }

    /// 前进直到 `target <= next_index`，然后在缓存窗口内定位到 `target`
    pub fn seek(&mut self, target: usize) -> SeekOutcome {
        while self.next_index < target {
            if self.advance().is_none() {
                return SeekOutcome::Exhausted;
            }
        }
        if target < self.oldest() {
            return SeekOutcome::Evicted;
        }
        self.next_index = target;
        SeekOutcome::Ready
    }
}

impl<I> Iterator for Seekable<I>
where
    I: Iterator,
    I::Item: Clone,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance()
    }
}
