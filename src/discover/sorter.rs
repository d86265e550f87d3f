// Copyright 2022 The Engula Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use tracing::warn;

const SEQUENCE_LEN: usize = 10;

/// Orders sequential node names by their numeric suffix. Names too short
/// to carry a suffix, or whose suffix is not a number, are left out.
pub fn sort_nodes(nodes: &[String]) -> Vec<String> {
    let mut seqs = Vec::with_capacity(nodes.len());
    for node in nodes {
        if node.len() <= SEQUENCE_LEN {
            continue;
        }
        let suffix = match node.get(node.len() - SEQUENCE_LEN..) {
            Some(s) => s,
            None => {
                warn!(node = %node, "node name has no sequence suffix");
                continue;
            }
        };
        match suffix.parse::<u64>() {
            Ok(seq) => seqs.push((seq, node)),
            Err(e) => warn!(node = %node, error = %e, "parse node sequence"),
        }
    }
    seqs.sort_by_key(|(seq, _)| *seq);
    seqs.into_iter().map(|(_, n)| n.to_owned()).collect()
}
