// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::error::{FairlockError, Result};

pub const SEPARATOR: char = '/';

/// Checks that `root` is usable as a lock root: absolute, not `/` itself,
/// no trailing separator, and no empty segments.
pub fn validate_root(root: &str) -> Result<()> {
    if !root.starts_with(SEPARATOR) {
        return Err(FairlockError::InvalidPath(format!(
            "'{root}' must start with '/'"
        )));
    }
    if root == "/" {
        return Err(FairlockError::InvalidPath(
            "the service root '/' cannot be used as a lock root".to_string(),
        ));
    }
    if root.ends_with(SEPARATOR) {
        return Err(FairlockError::InvalidPath(format!(
            "'{root}' must not end with '/'"
        )));
    }
    if root[1..].split(SEPARATOR).any(str::is_empty) {
        return Err(FairlockError::InvalidPath(format!(
            "'{root}' contains an empty segment"
        )));
    }
    Ok(())
}

pub fn join(parent: &str, child: &str) -> String {
    if parent.ends_with(SEPARATOR) {
        format!("{parent}{child}")
    } else {
        format!("{parent}{SEPARATOR}{child}")
    }
}

/// Every prefix path of `path`, shallowest first: `/a/b` gives `/a`, `/a/b`.
pub fn ancestors(path: &str) -> Vec<String> {
    let mut current = String::new();
    path.split(SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            current.push(SEPARATOR);
            current.push_str(segment);
            current.clone()
        })
        .collect()
}

/// Parent of `path`, or `None` for `/`.
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rsplit_once(SEPARATOR) {
        Some(("", _)) => Some("/"),
        Some((parent, _)) => Some(parent),
        None => None,
    }
}

/// Last segment of `path`; names without a separator are returned unchanged.
pub fn basename(path: &str) -> &str {
    path.rsplit_once(SEPARATOR)
        .map(|(_, name)| name)
        .unwrap_or(path)
}
