//! Profit & Loss report parsing
//!
//! Xero returns reports as a tree of rows keyed by `RowType`:
//!
//! ```json
//! {"Reports": [{"Rows": [
//!   {"RowType": "Header", "Cells": [{"Value": ""}, {"Value": "31 Mar 25"}]},
//!   {"RowType": "Section", "Title": "Less Operating Expenses", "Rows": [
//!     {"RowType": "Row", "Cells": [
//!       {"Value": "Food Costs", "Attributes": [{"Id": "account", "Value": "6004"}]},
//!       {"Value": "3120.00"}
//!     ]}
//!   ]}
//! ]}]}
//! ```
//!
//! Rows only appear for accounts with activity in the period, so the account row
//! is located by its `account` attribute, never by position. When the report
//! covers a single month, cell 1 is "this period".

use serde::Deserialize;
use serde_json::Value;

/// Index of the "this period" cell in a single-month report
pub const THIS_PERIOD_CELL: usize = 1;

/// Attribute id that carries the account code on a row's label cell
const ACCOUNT_ATTRIBUTE: &str = "account";

/// Report body could not be read as a Profit & Loss report
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("response is not JSON: {0}")]
    NotJson(String),

    #[error("response contains no report")]
    NoReport,
}

#[derive(Debug, Deserialize)]
struct ReportsEnvelope {
    #[serde(rename = "Reports", default)]
    reports: Vec<ProfitAndLossReport>,
}

/// A single report from the `Reports` array
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfitAndLossReport {
    #[serde(rename = "ReportName", default)]
    pub report_name: Option<String>,
    #[serde(rename = "Rows", default)]
    pub rows: Vec<ReportRow>,
}

/// One node of the report tree
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "RowType")]
pub enum ReportRow {
    Header {
        #[serde(rename = "Cells", default)]
        cells: Vec<ReportCell>,
    },
    Section {
        #[serde(rename = "Title", default)]
        title: Option<String>,
        #[serde(rename = "Rows", default)]
        rows: Vec<ReportRow>,
    },
    Row {
        #[serde(rename = "Cells", default)]
        cells: Vec<ReportCell>,
    },
    SummaryRow {
        #[serde(rename = "Cells", default)]
        cells: Vec<ReportCell>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportCell {
    #[serde(rename = "Value", default)]
    pub value: Option<Value>,
    #[serde(rename = "Attributes", default)]
    pub attributes: Vec<CellAttribute>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CellAttribute {
    #[serde(rename = "Id", default)]
    pub id: String,
    #[serde(rename = "Value", default)]
    pub value: Option<Value>,
}

impl CellAttribute {
    fn value_str(&self) -> Option<&str> {
        self.value.as_ref().and_then(Value::as_str)
    }
}

impl ReportCell {
    /// Label text of the cell, if it is a string
    pub fn text(&self) -> Option<&str> {
        self.value.as_ref().and_then(Value::as_str)
    }

    /// Numeric value of the cell; missing or non-numeric values are zero
    pub fn amount(&self) -> f64 {
        match &self.value {
            Some(Value::String(s)) => parse_money(s),
            Some(Value::Number(n)) => n.as_f64().filter(|v| v.is_finite()).unwrap_or(0.0),
            _ => 0.0,
        }
    }

    fn is_account(&self, account_code: &str) -> bool {
        self.attributes
            .iter()
            .any(|a| a.id == ACCOUNT_ATTRIBUTE && a.value_str() == Some(account_code))
    }
}

impl ProfitAndLossReport {
    /// Parse the first report out of a raw Xero response body
    pub fn from_json(raw: &str) -> Result<Self, ParseError> {
        let envelope: ReportsEnvelope =
            serde_json::from_str(raw).map_err(|e| ParseError::NotJson(e.to_string()))?;
        envelope
            .reports
            .into_iter()
            .next()
            .ok_or(ParseError::NoReport)
    }

    /// Cells of the row tagged with `account_code`, searching every section
    pub fn account_row(&self, account_code: &str) -> Option<&[ReportCell]> {
        find_account_row(&self.rows, account_code)
    }

    /// "This period" amount for an account; zero when the account had no activity
    pub fn amount_for_account(&self, account_code: &str) -> f64 {
        self.account_row(account_code)
            .and_then(|cells| cells.get(THIS_PERIOD_CELL))
            .map(ReportCell::amount)
            .unwrap_or(0.0)
    }

    /// Column labels from the header row (e.g. "31 Mar 25"), skipping the label column
    pub fn month_columns(&self) -> Vec<String> {
        self.rows
            .iter()
            .find_map(|row| match row {
                ReportRow::Header { cells } => Some(
                    cells
                        .iter()
                        .skip(1)
                        .map(|c| c.text().unwrap_or_default().to_string())
                        .collect(),
                ),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Header labels when the report does not have exactly one period column
    ///
    /// The amount is read from a fixed cell, so a comparison column or a
    /// multi-month layout would shift it. `None` when the layout is as expected
    /// or the report carries no header row.
    pub fn unexpected_period_columns(&self) -> Option<Vec<String>> {
        let has_header = self
            .rows
            .iter()
            .any(|row| matches!(row, ReportRow::Header { .. }));
        let columns = self.month_columns();
        (has_header && columns.len() != 1).then_some(columns)
    }

    /// Titles of every section, depth first
    pub fn section_titles(&self) -> Vec<String> {
        let mut titles = Vec::new();
        collect_titles(&self.rows, &mut titles);
        titles
    }
}

fn find_account_row<'a>(rows: &'a [ReportRow], account_code: &str) -> Option<&'a [ReportCell]> {
    rows.iter().find_map(|row| match row {
        ReportRow::Section { rows, .. } => find_account_row(rows, account_code),
        ReportRow::Row { cells } => cells
            .first()
            .filter(|label| label.is_account(account_code))
            .map(|_| cells.as_slice()),
        _ => None,
    })
}

fn collect_titles(rows: &[ReportRow], titles: &mut Vec<String>) {
    for row in rows {
        if let ReportRow::Section { title, rows } = row {
            if let Some(title) = title.as_deref().filter(|t| !t.is_empty()) {
                titles.push(title.to_string());
            }
            collect_titles(rows, titles);
        }
    }
}

/// Extract the "this period" amount for `account_code` from a raw report body
pub fn extract_amount(raw: &str, account_code: &str) -> Result<f64, ParseError> {
    Ok(ProfitAndLossReport::from_json(raw)?.amount_for_account(account_code))
}

/// Parse a money string such as "3,120.00" or "$-45.10"; anything unreadable is zero
pub fn parse_money(s: &str) -> f64 {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_with_rows(rows: &str) -> String {
        format!(
            r#"{{"Id":"x","Status":"OK","Reports":[{{"ReportID":"ProfitAndLoss","ReportName":"Profit and Loss","Rows":[
                {{"RowType":"Header","Cells":[{{"Value":""}},{{"Value":"31 Mar 25"}},{{"Value":"YTD"}}]}},
                {}
            ]}}]}}"#,
            rows
        )
    }

    fn account_row(code: &str, label: &str, value: &str) -> String {
        format!(
            r#"{{"RowType":"Row","Cells":[
                {{"Value":"{}","Attributes":[{{"Value":"{}","Id":"account"}}]}},
                {{"Value":"{}","Attributes":[{{"Value":"{}","Id":"account"}}]}},
                {{"Value":"9999.99"}}
            ]}}"#,
            label, code, value, code
        )
    }

    #[test]
    fn test_extracts_this_period_amount() {
        let raw = report_with_rows(&format!(
            r#"{{"RowType":"Section","Title":"Less Operating Expenses","Rows":[{}]}}"#,
            account_row("C", "Food Costs", "123.45")
        ));

        assert_eq!(extract_amount(&raw, "C").unwrap(), 123.45);
        assert_eq!(extract_amount(&raw, "C-prime").unwrap(), 0.0);
    }

    #[test]
    fn test_row_position_does_not_matter() {
        let raw = report_with_rows(&format!(
            r#"{{"RowType":"Section","Title":"Income","Rows":[{}]}},
               {{"RowType":"Section","Title":"Less Operating Expenses","Rows":[
                   {},
                   {{"RowType":"SummaryRow","Cells":[{{"Value":"Total"}},{{"Value":"5000"}}]}}
               ]}}"#,
            account_row("200", "Fees", "10000.00"),
            account_row("6004", "Food Costs", "3120.00"),
        ));

        let report = ProfitAndLossReport::from_json(&raw).unwrap();
        assert_eq!(report.amount_for_account("6004"), 3120.0);
        assert_eq!(report.amount_for_account("200"), 10000.0);
        assert_eq!(
            report.section_titles(),
            vec!["Income", "Less Operating Expenses"]
        );
        assert_eq!(report.month_columns(), vec!["31 Mar 25", "YTD"]);
        assert_eq!(
            report.unexpected_period_columns(),
            Some(vec!["31 Mar 25".to_string(), "YTD".to_string()])
        );
    }

    #[test]
    fn test_single_period_layout_is_expected() {
        let single = r#"{"Reports":[{"Rows":[
            {"RowType":"Header","Cells":[{"Value":""},{"Value":"31 Mar 25"}]}
        ]}]}"#;
        let report = ProfitAndLossReport::from_json(single).unwrap();
        assert_eq!(report.unexpected_period_columns(), None);

        let headerless = r#"{"Reports":[{"Rows":[]}]}"#;
        let report = ProfitAndLossReport::from_json(headerless).unwrap();
        assert_eq!(report.unexpected_period_columns(), None);
    }

    #[test]
    fn test_nested_sections_are_walked() {
        let raw = report_with_rows(&format!(
            r#"{{"RowType":"Section","Title":"Expenses","Rows":[
                {{"RowType":"Section","Title":"Centre","Rows":[{}]}}
            ]}}"#,
            account_row("6013", "Repairs", "88.10")
        ));
        assert_eq!(extract_amount(&raw, "6013").unwrap(), 88.1);
    }

    #[test]
    fn test_missing_or_bad_values_are_zero() {
        let raw = report_with_rows(
            r#"{"RowType":"Section","Rows":[
                {"RowType":"Row","Cells":[{"Value":"Only label","Attributes":[{"Value":"A","Id":"account"}]}]},
                {"RowType":"Row","Cells":[{"Value":"Text","Attributes":[{"Value":"B","Id":"account"}]},{"Value":"n/a"}]},
                {"RowType":"Row","Cells":[{"Value":"Null","Attributes":[{"Value":"C","Id":"account"}]},{"Value":null}]},
                {"RowType":"Row","Cells":[{"Value":"Number","Attributes":[{"Value":"D","Id":"account"}]},{"Value":42.5}]}
            ]}"#,
        );
        let report = ProfitAndLossReport::from_json(&raw).unwrap();
        assert_eq!(report.amount_for_account("A"), 0.0);
        assert_eq!(report.amount_for_account("B"), 0.0);
        assert_eq!(report.amount_for_account("C"), 0.0);
        assert_eq!(report.amount_for_account("D"), 42.5);
    }

    #[test]
    fn test_non_account_attributes_do_not_match() {
        let raw = report_with_rows(
            r#"{"RowType":"Section","Rows":[
                {"RowType":"Row","Cells":[{"Value":"Food","Attributes":[{"Value":"6004","Id":"groupID"}]},{"Value":"55.00"}]}
            ]}"#,
        );
        assert_eq!(extract_amount(&raw, "6004").unwrap(), 0.0);
    }

    #[test]
    fn test_malformed_bodies() {
        assert!(matches!(
            extract_amount("<html>Bad gateway</html>", "C"),
            Err(ParseError::NotJson(_))
        ));
        assert_eq!(
            extract_amount(r#"{"Reports":[]}"#, "C"),
            Err(ParseError::NoReport)
        );
        assert_eq!(extract_amount(r#"{"Status":"OK"}"#, "C"), Err(ParseError::NoReport));
    }

    #[test]
    fn test_unknown_row_types_are_ignored() {
        let raw = report_with_rows(&format!(
            r#"{{"RowType":"Spacer"}},{{"RowType":"Section","Rows":[{}]}}"#,
            account_row("C", "Food", "1.50")
        ));
        assert_eq!(extract_amount(&raw, "C").unwrap(), 1.5);
    }

    #[test]
    fn test_parse_money() {
        assert_eq!(parse_money("3,120.00"), 3120.0);
        assert_eq!(parse_money("$-45.10"), -45.1);
        assert_eq!(parse_money(""), 0.0);
        assert_eq!(parse_money("abc"), 0.0);
        assert_eq!(parse_money("1.2.3"), 0.0);
    }
}
