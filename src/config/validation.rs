//! Config validation: unknown-key detection with Levenshtein suggestions
//! and plausibility checks.
//!
//! Two-pass parse: the raw TOML is first read into a `toml::Value`, its key
//! tree is compared against the known field names and unknown keys produce
//! warnings with "did you mean?" suggestions. Normal serde deserialization
//! follows. Warnings never reject a config.

use std::collections::HashSet;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, ", did you mean '{s}'?")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Every valid dotted key path of `PipelineConfig`.
///
/// Kept by hand in step with pipeline_config.rs.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [pipeline]
        "pipeline",
        "pipeline.workers",
        "pipeline.failure_policy",
        "pipeline.model_sharing",
        "pipeline.progress_step_percent",
        // [scratch]
        "scratch",
        "scratch.parent_dir",
        "scratch.prefix",
        "scratch.compression_level",
        // [solver]
        "solver",
        "solver.earth_radius_km",
        // [archive]
        "archive",
        "archive.compression",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// A table `{ a = { b = 1, c = 2 } }` yields `["a", "a.b", "a.c"]`.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Closest known key within edit distance 3. Ties go to the alphabetically
/// first key so the suggestion is stable.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (levenshtein(unknown, k), k))
        .filter(|&(dist, _)| dist <= 3)
        .min()
        .map(|(_, k)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Warnings for every unknown key in a raw TOML document. Documents that do
/// not parse yield no warnings; serde reports the parse error afterwards.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new();
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Plausibility Checks
// ============================================================================

/// Values that are legal but probably a mistake.
pub fn plausibility_warnings(config: &super::PipelineConfig) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    let radius = config.solver.earth_radius_km;
    if radius.is_finite() && !(6300.0..=6400.0).contains(&radius) {
        warnings.push(ValidationWarning {
            field: "solver.earth_radius_km".to_string(),
            message: format!(
                "solver.earth_radius_km = {radius:.1} is far from the Earth's mean radius (6371 km)"
            ),
            suggestion: None,
        });
    }

    if let Ok(cpus) = std::thread::available_parallelism() {
        let workers = config.pipeline.workers;
        if workers > cpus.get() * 4 {
            warnings.push(ValidationWarning {
                field: "pipeline.workers".to_string(),
                message: format!(
                    "pipeline.workers = {workers} is more than 4x the {} available CPUs",
                    cpus.get()
                ),
                suggestion: None,
            });
        }
    }

    warnings
}
