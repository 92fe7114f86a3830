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

//! Lowest-sequence-wins ranking of the nodes queued under a lock root.

use crate::coordination::path;
use crate::error::{FairlockError, Result};

/// Separates a node's name from its service-assigned sequence suffix.
pub const SEQUENCE_SEPARATOR: char = '-';

/// Extracts the sequence number after the last `-` of a node name or path.
pub fn parse_sequence(node: &str) -> Result<u64> {
    let name = path::basename(node);
    let suffix = name
        .rsplit(SEQUENCE_SEPARATOR)
        .next()
        .unwrap_or_default();

    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FairlockError::MalformedSequence {
            node: node.to_string(),
        });
    }
    suffix
        .parse::<u64>()
        .map_err(|_| FairlockError::MalformedSequence {
            node: node.to_string(),
        })
}

/// The node directly ahead in line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predecessor {
    pub sequence: u64,
    pub name: String,
}

/// Where a candidate node stands among its siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ranking {
    pub own: u64,
    pub lowest: u64,
    pub predecessor: Option<Predecessor>,
    /// Number of siblings with a lower sequence.
    pub ahead: usize,
    /// Whether the candidate itself appeared in the listing.
    pub listed: bool,
}

impl Ranking {
    pub fn is_lowest(&self) -> bool {
        self.own == self.lowest
    }
}

/// Ranks `own_name` (sequence `own`) against the listed `children`.
///
/// Every child must carry a sequence suffix; anything else under the lock
/// root is treated as a broken service contract.
pub fn rank(own_name: &str, own: u64, children: &[String]) -> Result<Ranking> {
    let mut ranking = Ranking {
        own,
        lowest: own,
        predecessor: None,
        ahead: 0,
        listed: false,
    };

    for child in children {
        if child == own_name {
            ranking.listed = true;
            continue;
        }

        let sequence = parse_sequence(child)?;
        ranking.lowest = ranking.lowest.min(sequence);
        if sequence < own {
            ranking.ahead += 1;
            let closer = ranking
                .predecessor
                .as_ref()
                .is_none_or(|current| sequence > current.sequence);
            if closer {
                ranking.predecessor = Some(Predecessor {
                    sequence,
                    name: child.clone(),
                });
            }
        }
    }

    Ok(ranking)
}

/// Lock node names ordered by sequence, i.e. the order holders will be served.
pub fn queue_order(children: &[String]) -> Result<Vec<String>> {
    let mut ranked = children
        .iter()
        .map(|child| parse_sequence(child).map(|sequence| (sequence, child.clone())))
        .collect::<Result<Vec<_>>>()?;
    ranked.sort_by_key(|(sequence, _)| *sequence);
    Ok(ranked.into_iter().map(|(_, name)| name).collect())
}
