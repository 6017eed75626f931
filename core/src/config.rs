//! Stream configuration.
//!
//! `StreamConfig` is the serializable part (high-water marks) and can be read
//! from TOML; `StreamOptions` adds what cannot be serialized: byte-length and
//! map functions, and the scheduler.

use crate::byte_length::default_byte_length;
use crate::scheduler::Scheduler;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

pub const DEFAULT_HIGH_WATER_MARK: usize = 16384;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub high_water_mark: usize,
    pub readable_high_water_mark: Option<usize>,
    pub writable_high_water_mark: Option<usize>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            readable_high_water_mark: None,
            writable_high_water_mark: None,
        }
    }
}

impl StreamConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(input)
    }

    pub fn readable_hwm(&self) -> usize {
        self.readable_high_water_mark.unwrap_or(self.high_water_mark)
    }

    pub fn writable_hwm(&self) -> usize {
        self.writable_high_water_mark.unwrap_or(self.high_water_mark)
    }
}

pub type ByteLengthFn<T> = Rc<dyn Fn(&T) -> usize>;
pub type MapFn<T> = Box<dyn FnMut(T) -> T>;

/// Construction options for a stream reading `R` and writing `W`.
///
/// Per-half settings win over the shared ones.
pub struct StreamOptions<R, W> {
    pub(crate) config: StreamConfig,
    pub(crate) byte_length_readable: Option<ByteLengthFn<R>>,
    pub(crate) byte_length_writable: Option<ByteLengthFn<W>>,
    pub(crate) map_readable: Option<MapFn<R>>,
    pub(crate) map_writable: Option<MapFn<W>>,
    pub(crate) scheduler: Option<Rc<dyn Scheduler>>,
}

impl<R, W> Default for StreamOptions<R, W> {
    fn default() -> Self {
        Self {
            config: StreamConfig::default(),
            byte_length_readable: None,
            byte_length_writable: None,
            map_readable: None,
            map_writable: None,
            scheduler: None,
        }
    }
}

impl<R, W> fmt::Debug for StreamOptions<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamOptions")
            .field("config", &self.config)
            .field("byte_length_readable", &self.byte_length_readable.is_some())
            .field("byte_length_writable", &self.byte_length_writable.is_some())
            .field("map_readable", &self.map_readable.is_some())
            .field("map_writable", &self.map_writable.is_some())
            .field("scheduler", &self.scheduler.is_some())
            .finish()
    }
}

impl<R, W> StreamOptions<R, W> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            config: config.clone(),
            ..Self::default()
        }
    }

    pub fn high_water_mark(mut self, hwm: usize) -> Self {
        self.config.high_water_mark = hwm;
        self
    }

    pub fn readable_high_water_mark(mut self, hwm: usize) -> Self {
        self.config.readable_high_water_mark = Some(hwm);
        self
    }

    pub fn writable_high_water_mark(mut self, hwm: usize) -> Self {
        self.config.writable_high_water_mark = Some(hwm);
        self
    }

    pub fn byte_length_readable(mut self, f: impl Fn(&R) -> usize + 'static) -> Self {
        self.byte_length_readable = Some(Rc::new(f));
        self
    }

    pub fn byte_length_writable(mut self, f: impl Fn(&W) -> usize + 'static) -> Self {
        self.byte_length_writable = Some(Rc::new(f));
        self
    }

    pub fn map_readable(mut self, f: impl FnMut(R) -> R + 'static) -> Self {
        self.map_readable = Some(Box::new(f));
        self
    }

    pub fn map_writable(mut self, f: impl FnMut(W) -> W + 'static) -> Self {
        self.map_writable = Some(Box::new(f));
        self
    }

    pub fn scheduler(mut self, scheduler: Rc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

/// Shared settings, applied to both halves unless a per-half one is set.
///
/// Only available when both halves carry the same payload type; read-only and
/// write-only streams use the per-half setters.
impl<T: 'static> StreamOptions<T, T> {
    pub fn byte_length(self, f: impl Fn(&T) -> usize + 'static) -> Self {
        let f: ByteLengthFn<T> = Rc::new(f);
        let mut this = self;
        if this.byte_length_readable.is_none() {
            this.byte_length_readable = Some(Rc::clone(&f));
        }
        if this.byte_length_writable.is_none() {
            this.byte_length_writable = Some(f);
        }
        this
    }

    pub fn map(self, f: impl Fn(T) -> T + 'static) -> Self {
        let f = Rc::new(f);
        let mut this = self;
        if this.map_readable.is_none() {
            let f = Rc::clone(&f);
            this.map_readable = Some(Box::new(move |data| f(data)));
        }
        if this.map_writable.is_none() {
            this.map_writable = Some(Box::new(move |data| f(data)));
        }
        this
    }
}

pub(crate) fn byte_length_or_default<T: 'static>(f: Option<ByteLengthFn<T>>) -> ByteLengthFn<T> {
    f.unwrap_or_else(|| {
        let default: ByteLengthFn<T> = Rc::new(default_byte_length::<T>);
        default
    })
}
