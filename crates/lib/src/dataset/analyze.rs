//! Aggregates over a dataset: file summary and related-customer lookup.
//!
//! Columns are found by name signals (Persian and English); a dataset that lacks a signalled
//! column simply omits that part of the answer.

use super::{CellValue, Dataset};
use crate::text::fold;
use std::collections::HashMap;
use std::fmt;

/// Default number of customers reported by [`lookup_related_customers`].
pub const DEFAULT_LOOKUP_TOP_N: usize = 5;

const SUMMARY_TOP_N: usize = 3;

/// Name fragments of a column holding monetary totals, most specific first. Bare "مبلغ"
/// also names discount or tax columns, so it is the last resort.
const MONETARY_SIGNALS: &[&str] = &["جمع کل", "مبلغ کل", "total", "amount", "مبلغ"];
/// Name fragments of a column holding item descriptions.
const ITEM_SIGNALS: &[&str] = &["شرح کالا", "نام کالا", "کالا", "item", "product"];
/// Name fragments of a column holding customer identity.
const CUSTOMER_SIGNALS: &[&str] = &["نام مشتری", "مشتری", "خریدار", "customer", "client"];

fn find_column<'a>(dataset: &'a Dataset, signals: &[&str]) -> Option<(usize, &'a str)> {
    let folded: Vec<String> = dataset.columns().iter().map(|c| fold(c)).collect();
    signals.iter().find_map(|signal| {
        let signal = fold(signal);
        folded
            .iter()
            .position(|c| c.contains(&signal))
            .map(|i| (i, dataset.columns()[i].as_str()))
    })
}

/// Integer total of a monetary column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnTotal {
    pub column: String,
    pub total: i64,
}

/// Most frequent values of a column, descending by count, ties in first-seen order.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
    pub column: String,
    pub entries: Vec<(String, usize)>,
}

/// Count non-empty values and keep the `n` most frequent.
fn top_values<'a>(values: impl Iterator<Item = &'a CellValue>, n: usize) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for value in values {
        if value.is_empty() {
            continue;
        }
        let key = value.to_string();
        match index.get(&key) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(key.clone(), counts.len());
                counts.push((key, 1));
            }
        }
    }
    // stable sort keeps first-seen order among equal counts
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.truncate(n);
    counts
}

/// Overview of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<String>,
    pub monetary_total: Option<ColumnTotal>,
    pub top_items: Option<Ranking>,
    pub top_customers: Option<Ranking>,
}

/// Row/column counts and column list, plus the monetary total and top items/customers
/// when the matching columns exist.
pub fn summarize(dataset: &Dataset) -> Summary {
    let monetary_total = find_column(dataset, MONETARY_SIGNALS).map(|(idx, name)| {
        let total: f64 = dataset
            .column_values(idx)
            .filter_map(CellValue::as_number)
            .sum();
        ColumnTotal {
            column: name.to_string(),
            total: total as i64,
        }
    });
    let ranking = |signals: &[&str]| {
        find_column(dataset, signals).map(|(idx, name)| Ranking {
            column: name.to_string(),
            entries: top_values(dataset.column_values(idx), SUMMARY_TOP_N),
        })
    };
    Summary {
        row_count: dataset.row_count(),
        column_count: dataset.column_count(),
        columns: dataset.columns().to_vec(),
        monetary_total,
        top_items: ranking(ITEM_SIGNALS),
        top_customers: ranking(CUSTOMER_SIGNALS),
    }
}

fn write_ranking(f: &mut fmt::Formatter<'_>, title: &str, ranking: &Ranking) -> fmt::Result {
    write!(f, "\n{} («{}»):", title, ranking.column)?;
    if ranking.entries.is_empty() {
        return write!(f, "\n— بدون داده");
    }
    for (i, (value, count)) in ranking.entries.iter().enumerate() {
        write!(f, "\n{}. {} — {} بار", i + 1, value, count)?;
    }
    Ok(())
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "📊 خلاصه فایل")?;
        write!(f, "\nتعداد ردیف‌ها: {}", self.row_count)?;
        write!(f, "\nتعداد ستون‌ها: {}", self.column_count)?;
        write!(f, "\nستون‌ها: {}", self.columns.join("، "))?;
        if let Some(total) = &self.monetary_total {
            write!(f, "\n💰 جمع «{}»: {}", total.column, total.total)?;
        }
        if let Some(items) = &self.top_items {
            write_ranking(f, "🏆 پرتکرارترین کالاها", items)?;
        }
        if let Some(customers) = &self.top_customers {
            write_ranking(f, "👥 پرتکرارترین مشتریان", customers)?;
        }
        Ok(())
    }
}

/// Result of looking up which customers bought an item.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomerLookup {
    /// The dataset has no item-description or no customer column.
    MissingColumn { role: &'static str },
    /// No row's item description contains the term.
    NoMatch { term: String },
    Matches {
        term: String,
        matched_rows: usize,
        customers: Vec<(String, usize)>,
    },
}

/// Customers most often found on rows whose item description contains the first word of
/// `query_term` (case-insensitive).
pub fn lookup_related_customers(query_term: &str, dataset: &Dataset, top_n: usize) -> CustomerLookup {
    let term = query_term.split_whitespace().next().unwrap_or("").to_string();
    let Some((item_idx, _)) = find_column(dataset, ITEM_SIGNALS) else {
        return CustomerLookup::MissingColumn { role: "شرح کالا" };
    };
    let Some((customer_idx, _)) = find_column(dataset, CUSTOMER_SIGNALS) else {
        return CustomerLookup::MissingColumn { role: "نام مشتری" };
    };
    if term.is_empty() {
        return CustomerLookup::NoMatch { term };
    }
    let needle = fold(&term);
    let matched: Vec<&CellValue> = dataset
        .rows()
        .filter(|row| {
            row.cells()
                .get(item_idx)
                .map(|item| fold(&item.to_string()).contains(&needle))
                .unwrap_or(false)
        })
        .filter_map(|row| row.cells().get(customer_idx))
        .collect();
    if matched.is_empty() {
        return CustomerLookup::NoMatch { term };
    }
    CustomerLookup::Matches {
        term,
        matched_rows: matched.len(),
        customers: top_values(matched.into_iter(), top_n),
    }
}

impl fmt::Display for CustomerLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CustomerLookup::MissingColumn { role } => {
                write!(f, "⚠️ ستون «{}» در فایل پیدا نشد.", role)
            }
            CustomerLookup::NoMatch { term } => {
                write!(f, "🔍 هیچ ردیفی با «{}» پیدا نشد.", term)
            }
            CustomerLookup::Matches {
                term,
                matched_rows,
                customers,
            } => {
                write!(f, "🔍 «{}» در {} ردیف پیدا شد.", term, matched_rows)?;
                if customers.is_empty() {
                    return write!(f, "\nنام مشتری برای این ردیف‌ها ثبت نشده است.");
                }
                write!(f, "\nمشتریان مرتبط:")?;
                for (i, (name, count)) in customers.iter().enumerate() {
                    write!(f, "\n{}. {} — {} بار", i + 1, name, count)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn sales() -> Dataset {
        Dataset::new(
            vec!["شرح کالا".into(), "جمع کل خالص".into(), "نام مشتری".into()],
            vec![
                vec![text("X"), text("1,000"), text("Ali")],
                vec![text("X"), text("2,500"), text("Sara")],
            ],
        )
    }

    fn pharmacy() -> Dataset {
        Dataset::new(
            vec!["شرح کالا".into(), "نام مشتری".into()],
            vec![
                vec![text("Amoxicillin 500"), text("داروخانه الف")],
                vec![text("Cefixime"), text("داروخانه ب")],
                vec![text("amoxicillin 250"), text("داروخانه ب")],
                vec![text("AMOXICILLIN syrup"), text("داروخانه الف")],
                vec![text("Amoxicillin 1g"), text("داروخانه ج")],
                vec![text("amoxicillin drops"), text("داروخانه ب")],
            ],
        )
    }

    #[test]
    fn summary_sums_monetary_column_with_separators() {
        let summary = summarize(&sales());
        assert_eq!(
            summary.monetary_total,
            Some(ColumnTotal {
                column: "جمع کل خالص".to_string(),
                total: 3500
            })
        );
        assert!(summary.to_string().contains("3500"));
    }

    #[test]
    fn summary_reports_counts_and_top_values() {
        let summary = summarize(&sales());
        assert_eq!(summary.row_count, 2);
        assert_eq!(summary.column_count, 3);
        assert_eq!(summary.columns.len(), 3);
        let items = summary.top_items.unwrap();
        assert_eq!(items.entries, vec![("X".to_string(), 2)]);
        let customers = summary.top_customers.unwrap();
        assert_eq!(
            customers.entries,
            vec![("Ali".to_string(), 1), ("Sara".to_string(), 1)]
        );
    }

    #[test]
    fn summary_omits_absent_columns() {
        let dataset = Dataset::new(
            vec!["تاریخ".into(), "کد".into()],
            vec![vec![text("1402/01/01"), CellValue::Number(7.0)]],
        );
        let summary = summarize(&dataset);
        assert!(summary.monetary_total.is_none());
        assert!(summary.top_items.is_none());
        assert!(summary.top_customers.is_none());
        let rendered = summary.to_string();
        assert!(rendered.contains("تاریخ، کد"));
        assert!(!rendered.contains("💰"));
    }

    #[test]
    fn summary_matches_arabic_letter_variants_in_headers() {
        let dataset = Dataset::new(
            vec!["شرح كالا".into(), "نام مشتري".into()],
            vec![vec![text("X"), text("Ali")]],
        );
        let summary = summarize(&dataset);
        assert!(summary.top_items.is_some());
        assert!(summary.top_customers.is_some());
    }

    #[test]
    fn top_values_breaks_ties_by_first_seen() {
        let values = [text("b"), text("a"), text("a"), text("b"), text("c"), CellValue::Empty];
        assert_eq!(
            top_values(values.iter(), 3),
            vec![
                ("b".to_string(), 2),
                ("a".to_string(), 2),
                ("c".to_string(), 1)
            ]
        );
    }

    #[test]
    fn lookup_with_no_match_reports_no_match() {
        let result = lookup_related_customers("آموکسیسیلین", &sales(), DEFAULT_LOOKUP_TOP_N);
        assert_eq!(
            result,
            CustomerLookup::NoMatch {
                term: "آموکسیسیلین".to_string()
            }
        );
        assert!(result.to_string().contains("آموکسیسیلین"));
    }

    #[test]
    fn lookup_uses_first_token_case_insensitively() {
        let result = lookup_related_customers("amoxicillin capsules", &pharmacy(), 5);
        match result {
            CustomerLookup::Matches {
                term,
                matched_rows,
                customers,
            } => {
                assert_eq!(term, "amoxicillin");
                assert_eq!(matched_rows, 5);
                assert_eq!(
                    customers,
                    vec![
                        ("داروخانه الف".to_string(), 2),
                        ("داروخانه ب".to_string(), 2),
                        ("داروخانه ج".to_string(), 1),
                    ]
                );
            }
            other => panic!("expected matches, got {:?}", other),
        }
    }

    #[test]
    fn lookup_respects_top_n() {
        let result = lookup_related_customers("Amoxicillin", &pharmacy(), 1);
        let CustomerLookup::Matches { customers, .. } = result else {
            panic!("expected matches");
        };
        assert_eq!(customers, vec![("داروخانه الف".to_string(), 2)]);
    }

    #[test]
    fn lookup_without_customer_column_names_the_gap() {
        let dataset = Dataset::new(vec!["شرح کالا".into()], vec![vec![text("X")]]);
        let result = lookup_related_customers("X", &dataset, 5);
        assert_eq!(result, CustomerLookup::MissingColumn { role: "نام مشتری" });
    }

    #[test]
    fn total_column_wins_over_other_amounts() {
        let dataset = Dataset::new(
            vec!["مبلغ تخفیف".into(), "Total".into()],
            vec![vec![text("50"), text("1,000")], vec![text("20"), text("2,000")]],
        );
        let total = summarize(&dataset).monetary_total.unwrap();
        assert_eq!(total.column, "Total");
        assert_eq!(total.total, 3000);

        let only_amount = Dataset::new(vec!["مبلغ".into()], vec![vec![text("7")]]);
        assert_eq!(summarize(&only_amount).monetary_total.unwrap().total, 7);
    }
}
