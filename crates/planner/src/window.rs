//! Window definitions and window-result function contracts.
//!
//! Boundary math is a pure function of timestamp and configuration, anchored
//! at epoch 0, so independent members compute identical window edges without
//! coordination.

use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use weir_common::{Result, WeirError};

use crate::datamodel::{downcast_item, DynItem, Key};

/// Tumbling/sliding window shape: fixed length, fixed slide step.
///
/// Tumbling is the special case `slide_by == window_size`. Windows for a key
/// tile time without gaps; frame boundaries are multiples of `slide_by`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingWindowDef {
    window_size: i64,
    slide_by: i64,
}

impl SlidingWindowDef {
    pub fn tumbling(window_size: i64) -> Result<Self> {
        Self::sliding(window_size, window_size)
    }

    pub fn sliding(window_size: i64, slide_by: i64) -> Result<Self> {
        if slide_by <= 0 {
            return Err(WeirError::InvalidConfig(format!(
                "slide step must be positive, got {slide_by}"
            )));
        }
        if window_size <= 0 || window_size % slide_by != 0 {
            return Err(WeirError::InvalidConfig(format!(
                "window size must be a positive multiple of the slide step, \
                 got size {window_size} and step {slide_by}"
            )));
        }
        Ok(Self {
            window_size,
            slide_by,
        })
    }

    pub fn window_size(&self) -> i64 {
        self.window_size
    }

    pub fn slide_by(&self) -> i64 {
        self.slide_by
    }

    pub fn is_tumbling(&self) -> bool {
        self.window_size == self.slide_by
    }

    pub fn frames_per_window(&self) -> i64 {
        self.window_size / self.slide_by
    }

    /// Highest frame boundary `<= ts`. Euclidean remainder so negative
    /// timestamps floor toward negative infinity.
    pub fn floor_frame_ts(&self, ts: i64) -> i64 {
        ts - ts.rem_euclid(self.slide_by)
    }

    /// Lowest frame boundary `> ts`.
    pub fn higher_frame_ts(&self, ts: i64) -> i64 {
        self.floor_frame_ts(ts) + self.slide_by
    }

    /// The latest-starting window containing `ts`. For tumbling windows this
    /// is the unique window containing `ts`.
    pub fn window_containing(&self, ts: i64) -> Window {
        let start = self.floor_frame_ts(ts);
        Window {
            start,
            end: start + self.window_size,
        }
    }
}

/// Session window shape: windows close after `session_timeout` of inactivity
/// per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindowDef {
    session_timeout: i64,
}

impl SessionWindowDef {
    pub fn new(session_timeout: i64) -> Result<Self> {
        if session_timeout <= 0 {
            return Err(WeirError::InvalidConfig(format!(
                "session timeout must be positive, got {session_timeout}"
            )));
        }
        Ok(Self { session_timeout })
    }

    pub fn session_timeout(&self) -> i64 {
        self.session_timeout
    }
}

/// Window shape attached to a windowed-aggregate transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowDefinition {
    Sliding(SlidingWindowDef),
    Session(SessionWindowDef),
}

/// Half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub start: i64,
    pub end: i64,
}

impl Window {
    pub fn new(start: i64, end: i64) -> Result<Self> {
        if end <= start {
            return Err(WeirError::InvalidConfig(format!(
                "window end {end} must be greater than start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn length(&self) -> i64 {
        self.end - self.start
    }

    pub fn contains(&self, ts: i64) -> bool {
        self.start <= ts && ts < self.end
    }
}

/// Maps (window start, exclusive window end, aggregation result) to an
/// optional output item; `None` suppresses the emission.
pub type WindowResultFn = Arc<dyn Fn(i64, i64, DynItem) -> Result<Option<DynItem>> + Send + Sync>;

/// Keyed variant of [`WindowResultFn`].
pub type KeyedWindowResultFn =
    Arc<dyn Fn(i64, i64, &Key, DynItem) -> Result<Option<DynItem>> + Send + Sync>;

/// Wraps a typed window-result closure into a [`WindowResultFn`].
pub fn window_result_fn<R: Any, OUT: Any + Send + Sync>(
    f: impl Fn(i64, i64, &R) -> Option<OUT> + Send + Sync + 'static,
) -> WindowResultFn {
    Arc::new(move |start, end, result| {
        let typed = downcast_item::<R>(&result)?;
        Ok(f(start, end, typed).map(|out| Box::new(out) as DynItem))
    })
}

/// Wraps a typed keyed window-result closure into a [`KeyedWindowResultFn`].
pub fn keyed_window_result_fn<R: Any, OUT: Any + Send + Sync>(
    f: impl Fn(i64, i64, &Key, &R) -> Option<OUT> + Send + Sync + 'static,
) -> KeyedWindowResultFn {
    Arc::new(move |start, end, key, result| {
        let typed = downcast_item::<R>(&result)?;
        Ok(f(start, end, key, typed).map(|out| Box::new(out) as DynItem))
    })
}

/// Adapts an unkeyed window-result function by ignoring the key.
pub fn to_keyed_window_result_fn(f: WindowResultFn) -> KeyedWindowResultFn {
    Arc::new(move |start, end, _key, result| f(start, end, result))
}
