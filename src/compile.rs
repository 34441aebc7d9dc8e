//! Batch compilation of a table set.
//!
//! Each table runs through its own pipeline. Afterwards the reference
//! relations of every table are combined into one graph and checked for
//! cycles. Localization keys are unique across the whole batch: each table
//! starts with the keys issued by the tables compiled before it.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use itertools::Itertools;
use log::{info, warn};

use crate::{
    config::CompilerConfig,
    localization::LocalizationTable,
    pipeline::{CancellationToken, Pipeline, PipelineResult},
    processors::{StandardProcessors, standard_pipeline},
    reference::{KnownTypes, ReferenceGraph},
    sheet::SheetData,
    validation::RuleSet,
};

#[derive(Debug)]
pub struct BatchReport {
    pub results: Vec<PipelineResult>,
    pub cycles: Vec<Vec<String>>,
    /// Set when cycles were found and the configuration treats them as fatal.
    pub cycle_errors: Vec<String>,
}

impl BatchReport {
    pub fn success(&self) -> bool {
        self.cycle_errors.is_empty() && self.results.iter().all(|r| r.success)
    }

    pub fn failed_tables(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.table.as_str())
            .collect()
    }

    /// Localization entries of every successful table, in compile order.
    pub fn localization(&self) -> LocalizationTable {
        let mut combined = LocalizationTable::new();
        for result in self.results.iter().filter(|r| r.success) {
            combined.extend(&result.localization);
        }
        combined
    }
}

pub fn format_cycle(cycle: &[String]) -> String {
    cycle.iter().join(" -> ")
}

#[derive(Debug)]
pub struct Compiler {
    config: CompilerConfig,
    known_types: KnownTypes,
    cancellation: CancellationToken,
}

impl Compiler {
    pub fn new(config: CompilerConfig, mut known_types: KnownTypes) -> Self {
        known_types.extend(config.known_types.iter().cloned());
        Self {
            config,
            known_types,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn known_types(&self) -> &KnownTypes {
        &self.known_types
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn pipeline_for(
        &self,
        table: &str,
        known_types: KnownTypes,
        reserved_keys: BTreeSet<String>,
    ) -> Result<Pipeline> {
        let rules = match self.config.table_rules(table) {
            Some(rules) => RuleSet::from_config(rules)
                .with_context(|| format!("Loading validation rules for '{table}'"))?,
            None => RuleSet::new(),
        };
        Ok(standard_pipeline(
            self.config.pipeline_options(self.cancellation.clone()),
            StandardProcessors {
                known_types,
                localization: self.config.localization.clone(),
                rules,
                reserved_keys,
            },
        ))
    }

    pub fn compile_table(&self, sheet: SheetData) -> Result<PipelineResult> {
        let pipeline = self.pipeline_for(&sheet.name, self.known_types.clone(), BTreeSet::new())?;
        Ok(pipeline.run(sheet))
    }

    /// Compiles every sheet. Tables of the batch are known types for each
    /// other.
    pub fn compile_all(&self, sheets: Vec<SheetData>) -> Result<BatchReport> {
        let mut known_types = self.known_types.clone();
        known_types.extend(sheets.iter().map(|s| s.name.clone()));
        info!("Compiling {} table(s) against {} known type(s)", sheets.len(), known_types.len());

        let mut results = Vec::with_capacity(sheets.len());
        let mut issued_keys = BTreeSet::new();
        for sheet in sheets {
            let pipeline =
                self.pipeline_for(&sheet.name, known_types.clone(), issued_keys.clone())?;
            let result = pipeline.run(sheet);
            issued_keys.extend(result.localization.entries().iter().map(|e| e.key.clone()));
            results.push(result);
        }

        let graph = ReferenceGraph::from_relations(results.iter().flat_map(|r| r.references.iter()));
        let cycles = graph.detect_cycles();
        let mut cycle_errors = Vec::new();
        for cycle in &cycles {
            let message = format!("Circular reference: {}", format_cycle(cycle));
            if self.config.pipeline.fail_on_cycles {
                cycle_errors.push(message);
            } else {
                warn!("{message}");
            }
        }
        Ok(BatchReport {
            results,
            cycles,
            cycle_errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, header: &str) -> SheetData {
        SheetData::from_str_rows(
            name,
            &[&["Id", header], &["int", "int"], &["", ""], &["", "0"], &["1", "1"]],
        )
    }

    fn named(name: &str, text: &str, reference: &str) -> SheetData {
        SheetData::from_str_rows(
            name,
            &[
                &["Id", "Name@Lan", reference],
                &["int", "string", "int"],
                &["", "", ""],
                &["", "", "0"],
                &["1", text, "1"],
            ],
        )
    }

    #[test]
    fn localization_keys_are_unique_across_tables() {
        let sheets = vec![
            named("Weapon", "Sword of fire", "ItemId@Ref"),
            named("Armor", "Sword of fire and ice", "ItemId@Ref"),
        ];
        let compiler = Compiler::new(CompilerConfig::default(), KnownTypes::with_defaults());
        let report = compiler.compile_all(sheets).unwrap();
        assert!(report.success());

        let weapon = &report.results[0];
        let armor = &report.results[1];
        assert_eq!(weapon.normalized.cell(4, 1), "LOC_NAME_SWORD_OF_FIRE");
        assert_eq!(armor.normalized.cell(4, 1), "LOC_NAME_SWORD_OF_FIRE_1");

        let merged = report.localization();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get("NAME_SWORD_OF_FIRE"), Some("Sword of fire"));
        assert_eq!(merged.get("NAME_SWORD_OF_FIRE_1"), Some("Sword of fire and ice"));
    }

    #[test]
    fn failed_tables_leave_no_localization_entries() {
        let sheets = vec![
            named("Weapon", "Iron blade", "ItemId@Ref"),
            named("Armor", "Iron helm", "SkillId@Ref"),
        ];
        let compiler = Compiler::new(CompilerConfig::default(), KnownTypes::with_defaults());
        let report = compiler.compile_all(sheets).unwrap();
        assert_eq!(report.failed_tables(), vec!["Armor"]);
        assert!(!report.results[1].localization.is_empty());

        let merged = report.localization();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.get("NAME_IRON_BLADE"), Some("Iron blade"));
        assert_eq!(merged.get("NAME_IRON_HELM"), None);
    }

    #[test]
    fn mutual_references_form_a_cycle() {
        let sheets = vec![table("Skill", "BuffId@Ref"), table("Buff", "SkillId@Ref")];
        let compiler = Compiler::new(CompilerConfig::default(), KnownTypes::default());
        let report = compiler.compile_all(sheets).unwrap();
        assert!(report.results.iter().all(|r| r.success));
        assert_eq!(report.cycles.len(), 1);
        assert_eq!(report.cycles[0].first(), report.cycles[0].last());
        assert!(report.success());
    }

    #[test]
    fn fail_on_cycles_fails_the_batch() {
        let mut config = CompilerConfig::default();
        config.pipeline.fail_on_cycles = true;
        let compiler = Compiler::new(config, KnownTypes::default());
        let report = compiler.compile_all(vec![table("Skill", "NextId@ref_Skill")]).unwrap();
        assert_eq!(report.cycles, vec![vec!["Skill".to_string(), "Skill".to_string()]]);
        assert!(!report.success());
        assert_eq!(report.cycle_errors, vec!["Circular reference: Skill -> Skill".to_string()]);
    }
}
