//! Expands bundle lines into priced child rows.
//!
//! The parent row keeps its price with a full discount; the parent's net is
//! spread over the children in proportion to their gross, in integer minor
//! units, so the children always sum to exactly the bundle price.

use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::errors::ServiceError;
use crate::models::{from_minor, to_minor, InvoiceLine, LineItem, LineKind};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Expands `lines` in order. Lines with a non-positive quantity are dropped.
pub fn expand(lines: &[LineItem]) -> Result<Vec<InvoiceLine>, ServiceError> {
    let lines: Vec<&LineItem> = lines
        .iter()
        .filter(|line| {
            if line.quantity <= 0 {
                debug!(line_id = line.line_id, "Dropping line with non-positive quantity");
                false
            } else {
                true
            }
        })
        .collect();

    // First parent line per product id wins the children linking to it.
    let mut parent_by_product: HashMap<i64, i64> = HashMap::new();
    for line in lines.iter().filter(|l| l.is_bundle_parent) {
        parent_by_product.entry(line.product_id).or_insert(line.line_id);
    }

    let mut children: HashMap<i64, Vec<&LineItem>> = HashMap::new();
    let mut orphans: Vec<i64> = Vec::new();
    for line in lines.iter().filter(|l| !l.is_bundle_parent) {
        if let Some(link) = line.parent_link {
            match parent_by_product.get(&link) {
                Some(parent_line_id) => children.entry(*parent_line_id).or_default().push(line),
                None => {
                    warn!(
                        line_id = line.line_id,
                        parent_product = link,
                        "Bundle child without parent in order, treating as plain line"
                    );
                    orphans.push(line.line_id);
                }
            }
        }
    }

    let mut out = Vec::with_capacity(lines.len());
    for line in &lines {
        if line.is_bundle_parent {
            match children.get(&line.line_id) {
                Some(kids) => out.extend(expand_bundle(line, kids)?),
                None => out.push(plain(line)?),
            }
        } else if line.parent_link.is_none() || orphans.contains(&line.line_id) {
            out.push(plain(line)?);
        }
    }
    Ok(out)
}

fn plain(line: &LineItem) -> Result<InvoiceLine, ServiceError> {
    Ok(InvoiceLine {
        external_line_id: line.line_id,
        item_ref: line.item_ref(),
        name: line.name.clone(),
        quantity: line.quantity,
        rate: line.unit_price,
        discount_percentage: Decimal::ZERO,
        net_amount: from_minor(to_minor(line.gross()?)?),
        kind: LineKind::Plain,
    })
}

fn expand_bundle(parent: &LineItem, kids: &[&LineItem]) -> Result<Vec<InvoiceLine>, ServiceError> {
    let target = to_minor(parent.gross()?)?;
    let gross = kids
        .iter()
        .map(|k| to_minor(k.gross()?))
        .collect::<Result<Vec<i64>, ServiceError>>()?;
    let nets = allocate(target, &gross).map_err(|reason| {
        ServiceError::ArithmeticInvariantViolation(format!(
            "bundle line {}: {}",
            parent.line_id, reason
        ))
    })?;

    let mut rows = Vec::with_capacity(kids.len() + 1);
    rows.push(InvoiceLine {
        external_line_id: parent.line_id,
        item_ref: parent.item_ref(),
        name: parent.name.clone(),
        quantity: parent.quantity,
        rate: parent.unit_price,
        discount_percentage: HUNDRED,
        net_amount: Decimal::ZERO,
        kind: LineKind::BundleParent,
    });
    for ((kid, &gross_minor), &net_minor) in kids.iter().zip(&gross).zip(&nets) {
        rows.push(InvoiceLine {
            external_line_id: kid.line_id,
            item_ref: kid.item_ref(),
            name: kid.name.clone(),
            quantity: kid.quantity,
            rate: kid.unit_price,
            discount_percentage: discount_percentage(gross_minor, net_minor),
            net_amount: from_minor(net_minor),
            kind: LineKind::BundleChild {
                parent_line_id: parent.line_id,
            },
        });
    }

    verify(parent, target, &rows)?;
    Ok(rows)
}

/// Splits `target` over `weights` proportionally; the rounding residual goes to
/// the largest weight, first one on ties.
pub fn allocate(target: i64, weights: &[i64]) -> Result<Vec<i64>, String> {
    if weights.iter().any(|w| *w < 0) {
        return Err("negative component price".to_string());
    }
    let total: i128 = weights.iter().map(|w| *w as i128).sum();
    if total == 0 {
        if target != 0 {
            return Err(format!(
                "components have zero gross but the bundle is priced at {}",
                from_minor(target)
            ));
        }
        return Ok(vec![0; weights.len()]);
    }
    if target < 0 {
        return Err("negative bundle price".to_string());
    }

    let mut nets: Vec<i64> = Vec::with_capacity(weights.len());
    for weight in weights {
        let share = (target as i128 * *weight as i128) / total;
        nets.push(i64::try_from(share).map_err(|_| "allocation overflow".to_string())?);
    }

    let allocated: i64 = nets.iter().sum();
    let residual = target - allocated;
    if residual != 0 {
        let mut largest = 0;
        for (i, weight) in weights.iter().enumerate() {
            if *weight > weights[largest] {
                largest = i;
            }
        }
        nets[largest] += residual;
    }
    Ok(nets)
}

fn discount_percentage(gross_minor: i64, net_minor: i64) -> Decimal {
    if gross_minor == 0 {
        return Decimal::ZERO;
    }
    let share = Decimal::from(net_minor) / Decimal::from(gross_minor);
    ((Decimal::ONE - share) * HUNDRED).round_dp(6)
}

fn verify(parent: &LineItem, target: i64, rows: &[InvoiceLine]) -> Result<(), ServiceError> {
    let mut parent_net = None;
    let mut children_sum = 0_i64;
    for row in rows {
        match row.kind {
            LineKind::BundleParent => parent_net = Some(to_minor(row.net_amount)?),
            LineKind::BundleChild { .. } => children_sum += to_minor(row.net_amount)?,
            LineKind::Plain => {}
        }
    }
    if parent_net != Some(0) || children_sum != target {
        return Err(ServiceError::ArithmeticInvariantViolation(format!(
            "bundle line {}: children sum to {} but bundle is {}",
            parent.line_id,
            from_minor(children_sum),
            from_minor(target)
        )));
    }
    Ok(())
}
