// src/reconcile.rs

//! Repair and cross-check of a parsed receipt before it is persisted.
//!
//! Every item goes through the same fixed sequence: sanitise, quantity
//! scaling, discount percent/absolute derivation, discounted value, and its
//! effective cost. The sum of effective costs is then compared with the
//! declared total under an adaptive tolerance. Nothing here fails: defects
//! become [`ReconcileWarning`]s and the declared total is never replaced.

use crate::config::ReconcileSection;
use crate::receipt::{ReceiptData, ReceiptItem};
use std::fmt;

/// Non-fatal findings of a reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileWarning {
    /// Item has no price; it counts as 0 towards the item sum.
    MissingPrice { index: usize, name: String },
    /// Item had no usable name and got a placeholder.
    MissingName { index: usize },
    /// Quantity below 1 or not whole; reset to 1.
    InvalidQuantity { index: usize, name: String, value: f64 },
    /// A negative amount was dropped.
    NegativeAmount { field: &'static str, index: Option<usize>, value: f64 },
    /// A discount percent outside 0..=100 was dropped.
    DiscountOutOfRange { index: usize, name: String, value: f64 },
    /// Currency was not a 3-letter code and was dropped.
    InvalidCurrency { index: Option<usize>, value: String },
    /// Declared total and item sum disagree by more than the tolerance.
    TotalMismatch { declared: f64, computed: f64, tolerance: f64 },
}

impl fmt::Display for ReconcileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPrice { index, name } => {
                write!(f, "item {index} '{name}': missing price, counted as 0")
            }
            Self::MissingName { index } => write!(f, "item {index}: missing name"),
            Self::InvalidQuantity { index, name, value } => {
                write!(f, "item {index} '{name}': invalid quantity {value}, using 1")
            }
            Self::NegativeAmount { field, index: Some(i), value } => {
                write!(f, "item {i}: negative {field} {value} dropped")
            }
            Self::NegativeAmount { field, index: None, value } => {
                write!(f, "negative {field} {value} dropped")
            }
            Self::DiscountOutOfRange { index, name, value } => {
                write!(f, "item {index} '{name}': discount percent {value} outside 0-100 dropped")
            }
            Self::InvalidCurrency { index: Some(i), value } => {
                write!(f, "item {i}: currency '{value}' is not a 3-letter code")
            }
            Self::InvalidCurrency { index: None, value } => {
                write!(f, "total currency '{value}' is not a 3-letter code")
            }
            Self::TotalMismatch { declared, computed, tolerance } => write!(
                f,
                "declared total {declared:.2} differs from item sum {computed:.2} (tolerance {tolerance:.2})"
            ),
        }
    }
}

/// Output of [`reconcile`].
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub receipt: ReceiptData,
    pub warnings: Vec<ReconcileWarning>,
    /// Sum of effective line costs, rounded to cents.
    pub item_sum: f64,
}

/// Round half away from zero to 2 decimals.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

impl ReconcileSection {
    /// `max(base, relative * total)`: larger receipts absorb proportionally
    /// larger OCR misreads.
    pub fn tolerance_for(&self, total: f64) -> f64 {
        self.base_tolerance.max(self.relative_tolerance * total)
    }
}

/// Repair every item and cross-check the item sum against the declared total.
pub fn reconcile(mut receipt: ReceiptData, cfg: &ReconcileSection) -> Reconciled {
    let mut warnings = Vec::new();

    sanitize_total(&mut receipt, &mut warnings);

    let mut sum = 0.0;
    for (index, item) in receipt.items.iter_mut().enumerate() {
        sanitize_item(index, item, &mut warnings);
        scale_by_quantity(item);
        derive_discounts(index, item, &mut warnings);
        item.discount_value = discounted_value(item);

        match effective_cost(item) {
            Some(cost) => sum += cost,
            None => warnings.push(ReconcileWarning::MissingPrice {
                index,
                name: item_name(item),
            }),
        }
    }
    let item_sum = round2(sum);

    if let Some(declared) = receipt.total_price() {
        let tolerance = cfg.tolerance_for(declared);
        if (declared - item_sum).abs() > tolerance {
            warnings.push(ReconcileWarning::TotalMismatch {
                declared,
                computed: item_sum,
                tolerance,
            });
        }
    }

    Reconciled {
        receipt,
        warnings,
        item_sum,
    }
}

fn item_name(item: &ReceiptItem) -> String {
    item.name.clone().unwrap_or_default()
}

/// Trim and upper-case a currency; map the common symbols. `None` if the
/// result is not three ASCII letters.
pub fn normalize_currency(raw: &str) -> Option<String> {
    let code = match raw.trim() {
        "€" => "EUR".to_string(),
        "$" => "USD".to_string(),
        "£" => "GBP".to_string(),
        other => other.to_ascii_uppercase(),
    };
    (code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase())).then_some(code)
}

fn sanitize_currency(
    slot: &mut Option<String>,
    index: Option<usize>,
    warnings: &mut Vec<ReconcileWarning>,
) {
    if let Some(raw) = slot.take() {
        match normalize_currency(&raw) {
            Some(code) => *slot = Some(code),
            None => warnings.push(ReconcileWarning::InvalidCurrency { index, value: raw }),
        }
    }
}

fn drop_negative(
    slot: &mut Option<f64>,
    field: &'static str,
    index: Option<usize>,
    warnings: &mut Vec<ReconcileWarning>,
) {
    if let Some(value) = *slot {
        if value < 0.0 {
            *slot = None;
            warnings.push(ReconcileWarning::NegativeAmount { field, index, value });
        }
    }
}

fn sanitize_total(receipt: &mut ReceiptData, warnings: &mut Vec<ReconcileWarning>) {
    if let Some(total) = receipt.total.as_mut() {
        drop_negative(&mut total.value, "total_price", None, warnings);
        sanitize_currency(&mut total.currency, None, warnings);
    }
}

fn sanitize_item(index: usize, item: &mut ReceiptItem, warnings: &mut Vec<ReconcileWarning>) {
    if item.name.is_none() {
        item.name = Some(format!("item {}", index + 1));
        warnings.push(ReconcileWarning::MissingName { index });
    }

    item.quantity = match item.quantity {
        None => Some(1.0),
        Some(q) if q >= 1.0 && q.fract() == 0.0 => Some(q),
        Some(value) => {
            warnings.push(ReconcileWarning::InvalidQuantity {
                index,
                name: item_name(item),
                value,
            });
            Some(1.0)
        }
    };

    drop_negative(&mut item.price, "price", Some(index), warnings);
    drop_negative(&mut item.discount_absolute, "discount_absolute", Some(index), warnings);
    drop_negative(&mut item.unit_price, "unit_price", Some(index), warnings);
    sanitize_currency(&mut item.currency, Some(index), warnings);

    if let Some(value) = item.discount_percent {
        if !(0.0..=100.0).contains(&value) {
            item.discount_percent = None;
            warnings.push(ReconcileWarning::DiscountOutOfRange {
                index,
                name: item_name(item),
                value,
            });
        }
    }
}

/// Step 1: with quantity > 1 the source price is read as a unit price and
/// rewritten as the line total. The unit price is kept so that a second
/// pass over an already-scaled item is a no-op.
fn scale_by_quantity(item: &mut ReceiptItem) {
    let quantity = item.quantity.unwrap_or(1.0);
    let Some(price) = item.price else {
        return;
    };
    if quantity <= 1.0 {
        return;
    }
    if let Some(unit) = item.unit_price {
        if (round2(unit * quantity) - price).abs() < 1e-9 {
            return;
        }
    }
    item.unit_price = Some(price);
    item.price = Some(round2(price * quantity));
}

/// Steps 2 and 3: whichever of percent/absolute the source supplied is
/// authoritative; the other is derived from it.
fn derive_discounts(index: usize, item: &mut ReceiptItem, warnings: &mut Vec<ReconcileWarning>) {
    let Some(price) = item.price.filter(|p| *p != 0.0) else {
        return;
    };

    if item.discount_percent.is_none() {
        if let Some(absolute) = item.discount_absolute {
            let percent = (absolute / price * 100.0).round();
            if (0.0..=100.0).contains(&percent) {
                item.discount_percent = Some(percent);
            } else {
                warnings.push(ReconcileWarning::DiscountOutOfRange {
                    index,
                    name: item_name(item),
                    value: percent,
                });
            }
        }
    }

    if item.discount_absolute.is_none() {
        if let Some(percent) = item.discount_percent {
            item.discount_absolute = Some(round2(price * percent / 100.0));
        }
    }
}

/// Step 4: always recomputed. Percent wins over absolute.
fn discounted_value(item: &ReceiptItem) -> Option<f64> {
    let price = item.price?;
    if let Some(percent) = item.discount_percent {
        return Some(round2(price - price * percent / 100.0));
    }
    item.discount_absolute.map(|absolute| round2(price - absolute))
}

/// Step 5: what the line contributes to the item sum. `None` when the item
/// has no price at all.
fn effective_cost(item: &ReceiptItem) -> Option<f64> {
    item.discount_value.or(item.price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipt::TotalPrice;

    fn cfg() -> ReconcileSection {
        ReconcileSection::default()
    }

    fn item(name: &str, price: Option<f64>) -> ReceiptItem {
        ReceiptItem {
            name: Some(name.to_string()),
            price,
            ..Default::default()
        }
    }

    fn receipt(total: Option<f64>, items: Vec<ReceiptItem>) -> ReceiptData {
        ReceiptData {
            total: total.map(|v| TotalPrice {
                value: Some(v),
                currency: Some("EUR".into()),
            }),
            items,
            ..Default::default()
        }
    }

    fn has_mismatch(w: &[ReconcileWarning]) -> bool {
        w.iter()
            .any(|w| matches!(w, ReconcileWarning::TotalMismatch { .. }))
    }

    #[test]
    fn test_quantity_scaling() {
        let mut pane = item("Pane", Some(1.15));
        pane.quantity = Some(3.0);
        let out = reconcile(receipt(Some(3.45), vec![pane]), &cfg());
        let it = &out.receipt.items[0];
        assert_eq!(it.price, Some(3.45));
        assert_eq!(it.unit_price, Some(1.15));
        assert_eq!(it.discount_value, None);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_second_pass_does_not_rescale() {
        let mut pane = item("Pane", Some(1.00));
        pane.quantity = Some(2.0);
        let first = reconcile(receipt(Some(2.0), vec![pane]), &cfg());
        let second = reconcile(first.receipt.clone(), &cfg());
        assert_eq!(second.receipt.items[0].price, Some(2.0));
        assert_eq!(second.receipt, first.receipt);
    }

    #[test]
    fn test_quantity_defaults_to_one() {
        let out = reconcile(receipt(None, vec![item("Latte", Some(1.29))]), &cfg());
        assert_eq!(out.receipt.items[0].quantity, Some(1.0));
        assert_eq!(out.receipt.items[0].price, Some(1.29));
        assert_eq!(out.receipt.items[0].unit_price, None);
    }

    #[test]
    fn test_invalid_quantity_reset() {
        let mut mele = item("Mele", Some(2.0));
        mele.quantity = Some(0.5);
        let out = reconcile(receipt(None, vec![mele]), &cfg());
        assert_eq!(out.receipt.items[0].quantity, Some(1.0));
        assert_eq!(out.receipt.items[0].price, Some(2.0));
        assert!(matches!(
            out.warnings[0],
            ReconcileWarning::InvalidQuantity { value, .. } if value == 0.5
        ));
    }

    #[test]
    fn test_percent_from_absolute() {
        let mut it = item("Olio", Some(8.00));
        it.discount_absolute = Some(2.00);
        let out = reconcile(receipt(Some(6.0), vec![it]), &cfg());
        let it = &out.receipt.items[0];
        assert_eq!(it.discount_percent, Some(25.0));
        assert_eq!(it.discount_absolute, Some(2.0));
        assert_eq!(it.discount_value, Some(6.0));
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_absolute_from_percent() {
        let mut it = item("Caffè", Some(4.99));
        it.discount_percent = Some(20.0);
        let out = reconcile(receipt(None, vec![it]), &cfg());
        let it = &out.receipt.items[0];
        assert_eq!(it.discount_absolute, Some(1.0));
        assert_eq!(it.discount_value, Some(3.99));
    }

    #[test]
    fn test_percent_wins_over_absolute() {
        let mut it = item("Vino", Some(10.00));
        it.discount_percent = Some(10.0);
        it.discount_absolute = Some(3.00);
        let out = reconcile(receipt(None, vec![it]), &cfg());
        let it = &out.receipt.items[0];
        assert_eq!(it.discount_absolute, Some(3.0));
        assert_eq!(it.discount_value, Some(9.0));
    }

    #[test]
    fn test_discount_value_recomputed_not_trusted() {
        let mut it = item("Pasta", Some(1.50));
        it.discount_value = Some(0.10);
        let out = reconcile(receipt(None, vec![it]), &cfg());
        assert_eq!(out.receipt.items[0].discount_value, None);
    }

    #[test]
    fn test_discount_derivation_uses_scaled_price() {
        let mut it = item("Yogurt", Some(0.50));
        it.quantity = Some(4.0);
        it.discount_absolute = Some(0.50);
        let out = reconcile(receipt(None, vec![it]), &cfg());
        let it = &out.receipt.items[0];
        assert_eq!(it.price, Some(2.0));
        assert_eq!(it.discount_percent, Some(25.0));
        assert_eq!(it.discount_value, Some(1.5));
    }

    #[test]
    fn test_zero_price_skips_derivation() {
        let mut it = item("Omaggio", Some(0.0));
        it.discount_absolute = Some(1.0);
        let out = reconcile(receipt(None, vec![it]), &cfg());
        let it = &out.receipt.items[0];
        assert_eq!(it.discount_percent, None);
        assert_eq!(it.discount_value, Some(-1.0));
    }

    #[test]
    fn test_absolute_larger_than_price() {
        let mut it = item("Buono", Some(1.0));
        it.discount_absolute = Some(5.0);
        let out = reconcile(receipt(None, vec![it]), &cfg());
        assert_eq!(out.receipt.items[0].discount_percent, None);
        assert!(matches!(
            out.warnings[0],
            ReconcileWarning::DiscountOutOfRange { value, .. } if value == 500.0
        ));
    }

    #[test]
    fn test_missing_price_warns_and_counts_zero() {
        let out = reconcile(
            receipt(Some(2.0), vec![item("Sale", None), item("Pane", Some(2.0))]),
            &cfg(),
        );
        assert_eq!(out.item_sum, 2.0);
        assert_eq!(
            out.warnings,
            vec![ReconcileWarning::MissingPrice {
                index: 0,
                name: "Sale".into()
            }]
        );
        assert_eq!(out.receipt.items[0].discount_value, None);
    }

    #[test]
    fn test_tolerance_scales_with_total() {
        let out = reconcile(
            receipt(
                Some(100.00),
                vec![item("A", Some(60.00)), item("B", Some(40.05))],
            ),
            &cfg(),
        );
        assert_eq!(out.item_sum, 100.05);
        assert!(!has_mismatch(&out.warnings));
        assert_eq!(cfg().tolerance_for(100.0), 1.0);
    }

    #[test]
    fn test_small_total_uses_floor() {
        let out = reconcile(receipt(Some(10.00), vec![item("A", Some(10.20))]), &cfg());
        assert!(has_mismatch(&out.warnings));
        assert_eq!(cfg().tolerance_for(10.0), 0.10);
    }

    #[test]
    fn test_declared_total_is_kept() {
        let mut pane = item("Pane", Some(1.00));
        pane.quantity = Some(2.0);
        let out = reconcile(receipt(Some(9.50), vec![pane]), &cfg());
        assert_eq!(out.receipt.items[0].price, Some(2.0));
        assert_eq!(out.receipt.items[0].discount_value, None);
        assert_eq!(out.item_sum, 2.0);
        assert_eq!(out.receipt.total_price(), Some(9.50));
        assert_eq!(
            out.warnings,
            vec![ReconcileWarning::TotalMismatch {
                declared: 9.5,
                computed: 2.0,
                tolerance: 0.10,
            }]
        );
    }

    #[test]
    fn test_no_total_no_crosscheck() {
        let out = reconcile(receipt(None, vec![item("A", Some(99.0))]), &cfg());
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_sanitizes_for_schema_checks() {
        let mut it = ReceiptItem {
            price: Some(-1.0),
            currency: Some(" eur ".into()),
            discount_percent: Some(150.0),
            ..Default::default()
        };
        it.discount_absolute = Some(-2.0);
        let mut r = receipt(Some(-3.0), vec![it]);
        if let Some(t) = r.total.as_mut() {
            t.currency = Some("euro".into());
        }
        let out = reconcile(r, &cfg());
        let it = &out.receipt.items[0];
        assert_eq!(it.name.as_deref(), Some("item 1"));
        assert_eq!(it.price, None);
        assert_eq!(it.currency.as_deref(), Some("EUR"));
        assert_eq!(it.discount_percent, None);
        assert_eq!(it.discount_absolute, None);
        assert_eq!(out.receipt.total_price(), None);
        assert_eq!(out.receipt.total_currency(), None);
        // total (value + currency), name, price, discount_absolute, percent, missing price
        assert_eq!(out.warnings.len(), 7);
    }

    #[test]
    fn test_currency_symbols() {
        assert_eq!(normalize_currency("€").as_deref(), Some("EUR"));
        assert_eq!(normalize_currency("usd").as_deref(), Some("USD"));
        assert_eq!(normalize_currency("Euro"), None);
        assert_eq!(normalize_currency("E1R"), None);
    }

    #[test]
    fn test_round2_half_away_from_zero() {
        assert_eq!(round2(2.345_000_1), 2.35);
        assert_eq!(round2(-0.125), -0.13);
        assert_eq!(round2(1.0 * 3.0), 3.0);
    }
}
