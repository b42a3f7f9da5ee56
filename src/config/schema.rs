use serde_json::{json, Value};
use std::sync::LazyLock;

pub static CONFIG_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "scanners": {
                "type": "object",
                "properties": {
                    "runner": { "type": "string", "enum": ["local", "container"] },
                    "masscan_path": { "type": "string" },
                    "nmap_path": { "type": "string" },
                    "masscan_rate": { "type": "integer", "minimum": 1, "maximum": 100000 }
                }
            },
            "orchestrator": {
                "type": "object",
                "properties": {
                    "max_concurrent_scans": { "type": "integer", "minimum": 1 },
                    "default_timeout_secs": { "type": "integer", "minimum": 1 },
                    "timeout_grace_secs": { "type": "integer", "minimum": 0 }
                }
            },
            "aggregator": {
                "type": "object",
                "properties": {
                    "heuristic_confidence": { "type": "number", "minimum": 0, "maximum": 1 }
                }
            },
            "ranking": {
                "type": "object",
                "properties": {
                    "weights": {
                        "type": "object",
                        "properties": {
                            "accuracy": { "type": "number" },
                            "confidence": { "type": "number" },
                            "completeness": { "type": "number" },
                            "performance": { "type": "number" },
                            "success_rate": { "type": "number" }
                        }
                    },
                    "substring_score": { "type": "number", "minimum": 0, "maximum": 1 },
                    "response_ceiling_ms": { "type": "number", "exclusiveMinimum": 0 },
                    "alert_threshold": { "type": "integer", "minimum": 1 },
                    "high_severity_threshold": { "type": "integer", "minimum": 1 },
                    "success_threshold": { "type": "number", "minimum": 0, "maximum": 1 },
                    "period_days": { "type": "integer", "minimum": 1 },
                    "trend_days": { "type": "integer", "minimum": 1 },
                    "ground_truth_source": { "type": "string" },
                    "default_sample_size": { "type": "integer", "minimum": 1 },
                    "rank_interval_secs": { "type": "integer", "minimum": 1 },
                    "seed_default_sources": { "type": "boolean" }
                }
            },
            "scheduler": {
                "type": "object",
                "properties": {
                    "tick_secs": { "type": "integer", "minimum": 1, "maximum": 60 },
                    "timezone": { "type": "string", "enum": ["local", "utc"] },
                    "seed_default_schedules": { "type": "boolean" },
                    "default_targets": { "type": "array", "items": { "type": "string" } }
                }
            },
            "judge": {
                "type": "object",
                "properties": {
                    "enabled": { "type": "boolean" },
                    "base_url": { "type": "string" },
                    "model": { "type": "string" },
                    "api_key": { "type": "string" },
                    "timeout_secs": { "type": "integer", "minimum": 1 },
                    "max_retries": { "type": "integer", "minimum": 0, "maximum": 10 }
                }
            },
            "analyzer": {
                "type": "object",
                "properties": {
                    "enabled": { "type": "boolean" },
                    "model": { "type": "string" }
                }
            },
            "container": {
                "type": "object",
                "properties": {
                    "image": { "type": "string" },
                    "name": { "type": "string" },
                    "network_mode": { "type": "string" },
                    "capabilities": { "type": "array", "items": { "type": "string" } }
                }
            },
            "database": {
                "type": "object",
                "properties": {
                    "path": { "type": "string" }
                }
            }
        }
    })
});
