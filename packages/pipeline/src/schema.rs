//! Column alias resolution.
//!
//! Each dataset's column set is resolved once, at load time, against the
//! ordered alias lists of [`SchemaConfig`] into a canonical schema.

use std::collections::BTreeSet;
use std::str::FromStr as _;

use wealth_map_grid_models::{FieldPresence, GridField};

use crate::config::SchemaConfig;
use crate::load::normalize_column;

/// Returns the first alias (after normalization) present in `columns`.
#[must_use]
pub fn resolve_alias<S: AsRef<str>>(columns: &BTreeSet<String>, aliases: &[S]) -> Option<String> {
    aliases
        .iter()
        .map(|alias| normalize_column(alias.as_ref()))
        .find(|alias| columns.contains(alias))
}

/// The canonical schema of one grid dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSchema {
    /// Source column of every published field, in field order.
    pub fields: Vec<(GridField, String)>,
    /// Per-cell average income column, used only when the income sum is
    /// not published.
    pub avg_income: Option<String>,
    /// Native administrative-unit key column.
    pub cell_unit_key: Option<String>,
}

impl ResolvedSchema {
    /// Resolves a grid dataset's columns.
    #[must_use]
    pub fn resolve(columns: &BTreeSet<String>, config: &SchemaConfig) -> Self {
        for key in config.fields.keys() {
            if GridField::from_str(&normalize_column(key)).is_err() {
                log::warn!("Ignoring aliases for unknown field '{key}'");
            }
        }

        let fields = GridField::all()
            .iter()
            .filter_map(|field| {
                let mut aliases = vec![field.column().to_string()];
                if let Some(extra) = config.fields.get(field.column()) {
                    aliases.extend(extra.iter().cloned());
                }
                resolve_alias(columns, &aliases).map(|column| (*field, column))
            })
            .collect();

        Self {
            fields,
            avg_income: resolve_alias(columns, &config.avg_income),
            cell_unit_key: resolve_alias(columns, &config.cell_unit_key),
        }
    }

    /// Source column of a field, if published.
    #[must_use]
    pub fn column(&self, field: GridField) -> Option<&str> {
        self.fields
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, column)| column.as_str())
    }

    /// Whether the income sum is derived from average income × population.
    #[must_use]
    pub fn derives_income(&self) -> bool {
        self.column(GridField::IncomeSum).is_none()
            && self.avg_income.is_some()
            && self.column(GridField::Population).is_some()
    }

    /// Fields that carry real data in this dataset.
    #[must_use]
    pub fn presence(&self) -> FieldPresence {
        let mut presence: FieldPresence = self.fields.iter().map(|(f, _)| *f).collect();
        if self.derives_income() {
            presence.insert(GridField::IncomeSum);
        }
        presence
    }
}
