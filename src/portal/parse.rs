//! Parsing of the portal's attendance report into [`AttendanceRecord`]s.
//!
//! The report is the first `table.table` on the page. Columns are located by their header text
//! rather than their position so that an added or reordered column does not silently shift
//! values into the wrong fields.

use crate::error::PortalError;
use crate::models::AttendanceRecord;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;

fn selector(cell: &'static OnceLock<Selector>, css: &'static str) -> &'static Selector {
    cell.get_or_init(|| match Selector::parse(css) {
        Ok(sel) => sel,
        Err(e) => panic!("Error parsing static selector {css}: {e:?}"),
    })
}

macro_rules! static_selector {
    ($name:ident <- $css:literal) => {
        fn $name() -> &'static Selector {
            static CELL: OnceLock<Selector> = OnceLock::new();
            selector(&CELL, $css)
        }
    };
}

static_selector!(table_selector <- "table.table");
static_selector!(row_selector <- "tr");
static_selector!(header_selector <- "th");
static_selector!(cell_selector <- "td");

/// Where each field lives in a table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Columns {
    code: usize,
    name: usize,
    total: usize,
    present: usize,
    absent: usize,
    percentage: usize,
}

impl Columns {
    fn from_headers(headers: &[String]) -> Result<Self, PortalError> {
        let mut code = None;
        let mut name = None;
        let mut total = None;
        let mut present = None;
        let mut absent = None;
        let mut total_percentage = None;
        let mut average_percentage = None;

        for (i, header) in headers.iter().enumerate() {
            let header = header.to_lowercase();
            let slot = if header.contains("code") {
                &mut code
            } else if header.contains("description") || header.contains("subject") {
                &mut name
            } else if header.contains("max") {
                &mut total
            } else if header.starts_with("att") {
                &mut present
            } else if header.contains("absent") {
                &mut absent
            } else if header.contains("total") && (header.contains('%') || header.contains("percent")) {
                &mut total_percentage
            } else if header.contains("average") || header == "%" {
                &mut average_percentage
            } else {
                continue;
            };
            slot.get_or_insert(i);
        }

        let require = |slot: Option<usize>, label: &str| {
            slot.ok_or_else(|| PortalError::Parse(format!("attendance table has no '{label}' column")))
        };

        Ok(Self {
            code: require(code, "Code")?,
            name: require(name, "Description")?,
            total: require(total, "Max. hours")?,
            present: require(present, "Att. hours")?,
            absent: require(absent, "Absent hours")?,
            percentage: require(total_percentage.or(average_percentage), "Total Percentage")?,
        })
    }

    fn width(&self) -> usize {
        [
            self.code,
            self.name,
            self.total,
            self.present,
            self.absent,
            self.percentage,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
            + 1
    }
}

/// The text of an element with runs of whitespace collapsed to single spaces.
fn cell_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_hours(value: &str, field: &str, code: &str) -> Result<i32, PortalError> {
    value
        .parse()
        .ok()
        .filter(|hours: &i32| *hours >= 0)
        .ok_or_else(|| {
            PortalError::Parse(format!("{field} of {code} is not a whole number: '{value}'"))
        })
}

/// Percentages must be finite and non-negative, so a stored row always compares equal to itself.
fn parse_percentage(value: &str, code: &str) -> Result<f64, PortalError> {
    value
        .trim_end_matches('%')
        .trim()
        .parse()
        .ok()
        .filter(|percentage: &f64| percentage.is_finite() && *percentage >= 0.0)
        .ok_or_else(|| PortalError::Parse(format!("percentage of {code} is not a number: '{value}'")))
}

/// Extracts the attendance rows from the report page, skipping any subject code in `blacklist`.
pub fn parse_attendance(html: &str, blacklist: &[String]) -> Result<Vec<AttendanceRecord>, PortalError> {
    let document = Html::parse_document(html);

    let table = document
        .select(table_selector())
        .next()
        .ok_or_else(|| PortalError::Parse("attendance table not found".to_string()))?;

    let headers: Vec<String> = table.select(header_selector()).map(cell_text).collect();
    let columns = Columns::from_headers(&headers)?;

    let mut records = Vec::new();

    for row in table.select(row_selector()) {
        let cells: Vec<String> = row.select(cell_selector()).map(cell_text).collect();
        if cells.iter().all(String::is_empty) {
            // Header rows and spacers.
            continue;
        }

        let code = cells.get(columns.code).map(String::as_str).unwrap_or_default();
        if blacklist.iter().any(|blocked| blocked == code) {
            continue;
        }
        if cells.len() < columns.width() {
            return Err(PortalError::Parse(format!(
                "row '{code}' has {} cells, expected at least {}",
                cells.len(),
                columns.width()
            )));
        }
        if code.is_empty() {
            return Err(PortalError::Parse("row without a subject code".to_string()));
        }

        records.push(AttendanceRecord {
            subject_code: code.to_string(),
            subject_name: cells[columns.name].clone(),
            total_hours: parse_hours(&cells[columns.total], "max hours", code)?,
            present_hours: parse_hours(&cells[columns.present], "attended hours", code)?,
            absent_hours: parse_hours(&cells[columns.absent], "absent hours", code)?,
            percentage: parse_percentage(&cells[columns.percentage], code)?,
        });
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"
        <html><body>
        <table class="table">
          <tr>
            <th>Code</th><th>Description</th><th>Max. hours</th><th>Att. hours</th>
            <th>Absent hours</th><th>Average %</th><th>OD/ML Percentage</th><th>Total Percentage</th>
          </tr>
          <tr>
            <td>18CSC301T</td><td>Formal Language
                and Automata</td><td>40</td><td>36</td><td>4</td><td>90.00</td><td>0.00</td><td>90.00</td>
          </tr>
          <tr>
            <td>18CSC302J</td><td>Computer Networks</td><td>30</td><td>21</td><td>9</td><td>70.00</td><td>5.00</td><td>75.00 %</td>
          </tr>
          <tr>
            <td>Total</td><td></td><td>70</td><td>57</td><td>13</td><td>81.43</td><td></td><td>81.43</td>
          </tr>
        </table>
        <table class="table"><tr><th>Something else</th></tr></table>
        </body></html>
    "#;

    fn blacklist(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_parse_report() {
        let records = parse_attendance(REPORT, &blacklist(&["Total"])).unwrap();

        assert_eq!(
            records,
            vec![
                AttendanceRecord {
                    subject_code: "18CSC301T".to_string(),
                    subject_name: "Formal Language and Automata".to_string(),
                    total_hours: 40,
                    present_hours: 36,
                    absent_hours: 4,
                    percentage: 90.0,
                },
                AttendanceRecord {
                    subject_code: "18CSC302J".to_string(),
                    subject_name: "Computer Networks".to_string(),
                    total_hours: 30,
                    present_hours: 21,
                    absent_hours: 9,
                    percentage: 75.0,
                },
            ]
        );
    }

    #[test]
    fn test_blacklist_is_configurable() {
        let records = parse_attendance(REPORT, &blacklist(&["Total", "18CSC302J"])).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].subject_code, "18CSC301T");
    }

    #[test]
    fn test_summary_row_is_data_when_not_blacklisted() {
        // The summary row has no description, but it is otherwise well formed.
        let records = parse_attendance(REPORT, &[]).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].subject_code, "Total");
    }

    #[test]
    fn test_average_percentage_fallback() {
        let html = r#"
            <table class="table">
              <tr><th>Code</th><th>Description</th><th>Max. hours</th><th>Att. hours</th><th>Absent hours</th><th>Average %</th></tr>
              <tr><td>MA101</td><td>Calculus</td><td>10</td><td>5</td><td>5</td><td>50.0</td></tr>
            </table>
        "#;
        let records = parse_attendance(html, &[]).unwrap();
        assert_eq!(records[0].percentage, 50.0);
    }

    #[test]
    fn test_missing_table() {
        let err = parse_attendance("<html><body><p>Session expired</p></body></html>", &[])
            .unwrap_err();
        assert!(matches!(err, PortalError::Parse(msg) if msg.contains("not found")));
    }

    #[test]
    fn test_missing_column() {
        let html = r#"
            <table class="table">
              <tr><th>Code</th><th>Description</th><th>Max. hours</th></tr>
              <tr><td>MA101</td><td>Calculus</td><td>10</td></tr>
            </table>
        "#;
        let err = parse_attendance(html, &[]).unwrap_err();
        assert!(matches!(err, PortalError::Parse(msg) if msg.contains("Att. hours")));
    }

    #[test]
    fn test_non_numeric_hours() {
        let html = r#"
            <table class="table">
              <tr><th>Code</th><th>Description</th><th>Max. hours</th><th>Att. hours</th><th>Absent hours</th><th>Total Percentage</th></tr>
              <tr><td>MA101</td><td>Calculus</td><td>10</td><td>N/A</td><td>5</td><td>50.0</td></tr>
            </table>
        "#;
        let err = parse_attendance(html, &[]).unwrap_err();
        assert!(matches!(err, PortalError::Parse(msg) if msg.contains("MA101")));
    }

    #[test]
    fn test_short_row() {
        let html = r#"
            <table class="table">
              <tr><th>Code</th><th>Description</th><th>Max. hours</th><th>Att. hours</th><th>Absent hours</th><th>Total Percentage</th></tr>
              <tr><td>MA101</td><td>Calculus</td></tr>
            </table>
        "#;
        assert!(matches!(
            parse_attendance(html, &[]),
            Err(PortalError::Parse(_))
        ));
    }

    #[test]
    fn test_rejects_nonsense_numbers() {
        for (hours, percentage) in [("5", "NaN"), ("5", "inf"), ("5", "-1.0"), ("-5", "50.0")] {
            let html = format!(
                r#"
                <table class="table">
                  <tr><th>Code</th><th>Description</th><th>Max. hours</th><th>Att. hours</th><th>Absent hours</th><th>Total Percentage</th></tr>
                  <tr><td>MA101</td><td>Calculus</td><td>10</td><td>{hours}</td><td>5</td><td>{percentage}</td></tr>
                </table>
            "#
            );
            assert!(
                matches!(parse_attendance(&html, &[]), Err(PortalError::Parse(_))),
                "accepted hours={hours} percentage={percentage}"
            );
        }
    }
}
