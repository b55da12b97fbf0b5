//! Hit maps and LCOV rendering.

use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Execution counts for one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HitMap {
    pub line_hits: BTreeMap<u32, u64>,
    pub func_hits: BTreeMap<u32, u64>,
    pub func_names: BTreeMap<u32, String>,
    pub branch_hits: BTreeMap<u32, u64>,
}

impl HitMap {
    /// Add `other`'s counts into `self`.
    pub fn merge(&mut self, other: &HitMap) {
        for (line, hits) in &other.line_hits {
            *self.line_hits.entry(*line).or_default() += hits;
        }
        for (line, hits) in &other.func_hits {
            *self.func_hits.entry(*line).or_default() += hits;
        }
        for (line, name) in &other.func_names {
            self.func_names.entry(*line).or_insert_with(|| name.clone());
        }
        for (line, hits) in &other.branch_hits {
            *self.branch_hits.entry(*line).or_default() += hits;
        }
    }

    pub fn lines_found(&self) -> usize {
        self.line_hits.len()
    }

    pub fn lines_hit(&self) -> usize {
        self.line_hits.values().filter(|h| **h > 0).count()
    }
}

/// Which optional record kinds to emit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LcovOptions {
    pub functions: bool,
    pub branches: bool,
}

/// Render `files` (path → hits) as an LCOV tracefile.
pub fn format_lcov(files: &BTreeMap<String, HitMap>, options: LcovOptions) -> String {
    let mut out = String::new();
    for (path, hits) in files {
        let _ = writeln!(out, "SF:{}", path);

        if options.functions {
            for (line, name) in &hits.func_names {
                let _ = writeln!(out, "FN:{},{}", line, name);
            }
            let mut functions_hit = 0;
            for (line, name) in &hits.func_names {
                let count = hits.func_hits.get(line).copied().unwrap_or(0);
                if count > 0 {
                    functions_hit += 1;
                }
                let _ = writeln!(out, "FNDA:{},{}", count, name);
            }
            let _ = writeln!(out, "FNF:{}", hits.func_names.len());
            let _ = writeln!(out, "FNH:{}", functions_hit);
        }

        if options.branches {
            for (line, count) in &hits.branch_hits {
                let _ = writeln!(out, "BRDA:{},0,0,{}", line, count);
            }
            let _ = writeln!(out, "BRF:{}", hits.branch_hits.len());
            let _ = writeln!(
                out,
                "BRH:{}",
                hits.branch_hits.values().filter(|h| **h > 0).count()
            );
        }

        for (line, count) in &hits.line_hits {
            let _ = writeln!(out, "DA:{},{}", line, count);
        }
        let _ = writeln!(out, "LF:{}", hits.lines_found());
        let _ = writeln!(out, "LH:{}", hits.lines_hit());
        out.push_str("end_of_record\n");
    }
    out
}
