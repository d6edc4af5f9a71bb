//! Trigger drivers.
//!
//! Each driver connects one protocol source to a runner's event channel:
//! `start` spawns the producer task(s) and returns, `stop` tears them down.
//! None is restartable after `stop`.

pub mod cloud_events;
pub mod cron;
pub mod http;
pub mod k8s_events;
pub mod k8s_http;
pub mod kafka;
pub mod mqtt;
pub mod redis;

use eventrigger_operator::error::{Error, Result};

use std::collections::BTreeMap;

pub(crate) fn required_meta<'a>(meta: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str> {
    meta.get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::MissingData(format!("trigger meta requires {key}")))
}

pub(crate) fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `headers` meta of the form `X-Key=value,Other=v2` into pairs.
pub(crate) fn split_header_pairs(value: &str) -> Result<Vec<(String, String)>> {
    split_list(value)
        .into_iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| Error::ParseError(format!("invalid header pair {pair}")))
        })
        .collect()
}
