//! Kernel feature descriptor.
//!
//! The semantic analyser gates a handful of builtins and constructs on
//! kernel support. Tests flip the whole set at once, mirroring how the
//! runtime probes features in bulk.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    pub for_each_map_elem: bool,
    pub get_func_ip: bool,
    pub map_lookup_percpu_elem: bool,
    pub signal: bool,
    pub override_return: bool,
    pub skb_output: bool,
    pub socket_cookie: bool,
    pub fentry: bool,
    pub jiffies64: bool,
}

impl Features {
    /// Everything available.
    pub fn all() -> Self {
        Self {
            for_each_map_elem: true,
            get_func_ip: true,
            map_lookup_percpu_elem: true,
            signal: true,
            override_return: true,
            skb_output: true,
            socket_cookie: true,
            fentry: true,
            jiffies64: true,
        }
    }

    /// Nothing available.
    pub fn none() -> Self {
        Self {
            for_each_map_elem: false,
            get_func_ip: false,
            map_lookup_percpu_elem: false,
            signal: false,
            override_return: false,
            skb_output: false,
            socket_cookie: false,
            fentry: false,
            jiffies64: false,
        }
    }
}

impl Default for Features {
    fn default() -> Self {
        Self::all()
    }
}
