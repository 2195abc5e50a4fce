//! The `diagnos init` command.

use std::path::Path;

use anyhow::Result;

pub fn execute() -> Result<()> {
    write_if_missing(Path::new("diagnos.toml"), SAMPLE_CONFIG)?;

    std::fs::create_dir_all("events")?;
    write_if_missing(Path::new("events/example.jsonl"), EXAMPLE_EVENTS)?;

    println!("\nNext steps:");
    println!("  1. Tune thresholds in diagnos.toml");
    println!("  2. Run: diagnos replay --events events/example.jsonl --output session.json");
    println!("  3. Run: diagnos coverage --session session.json");
    println!("  4. Run: diagnos review --snapshot store.json");

    Ok(())
}

fn write_if_missing(path: &Path, content: &str) -> Result<()> {
    if path.exists() {
        println!("{} already exists, skipping.", path.display());
    } else {
        std::fs::write(path, content)?;
        println!("Created {}", path.display());
    }
    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# diagnos configuration

parallelism = 4
query_timeout_secs = 30
output_dir = "./diagnos-results"

# dedupe_unresolved: skip an alert while an identical one is still open
# keep_history: always insert
alert_policy = "dedupe_unresolved"

[thresholds]
min_attempts = 10
high_slip_critical = 0.4
min_discrimination = 0.0
useless_distractor_limit = 0.05
dif_gap_warning = 0.25
label_bias_threshold = 0.2
concept_drift_alarm = 0.15
drift_window_days = 7
drift_min_recent = 5
drift_min_historical = 10
min_group_size = 1

[coverage]
exploration_floor = 3
ranking_dependency_threshold = 3
recheck_validated = false
"#;

const EXAMPLE_EVENTS: &str = r#"{"type":"concept_added","id":"fractions","label":"Fractions","description":"Parts of a whole"}
{"type":"concept_added","id":"decimals","label":"Decimals","dependencies":["fractions"]}
{"type":"concept_added","id":"percentages","label":"Percentages","dependencies":["fractions","decimals"]}
{"type":"turn_recorded","role":"student","content":"1/8 is bigger than 1/4 because 8 is bigger than 4."}
{"type":"misconception_added","id":"bigger-denominator","label":"Bigger denominator means bigger fraction","related_concept_id":"fractions","severity":"high"}
{"type":"probe_generated","probe_id":"p-fractions","target_id":"fractions","target_type":"concept","probe_type":"MASTERY","administered":true}
{"type":"mastery_assessed","concept_id":"fractions","level":0.4}
"#;
