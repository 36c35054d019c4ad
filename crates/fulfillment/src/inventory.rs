//! Stock movement inside a caller-supplied transaction.
//!
//! These helpers never commit. They share atomicity with whatever checkout,
//! cancellation or restock operation opened the transaction.

use common::ProductId;
use domain::OrderLine;
use store::StoreTransaction;

use crate::error::{FulfillmentError, Result};

/// Takes `quantity` units of a product, failing with `InsufficientStock`
/// when the conditional decrement does not apply.
pub async fn take(
    tx: &mut dyn StoreTransaction,
    product_id: ProductId,
    quantity: u32,
) -> Result<()> {
    if tx.try_decrement_stock(product_id, quantity).await? {
        return Ok(());
    }
    let available = match tx.get_product(product_id).await? {
        Some(product) => product.stock,
        None => return Err(FulfillmentError::ProductNotFound(product_id)),
    };
    Err(FulfillmentError::InsufficientStock {
        product_id,
        requested: quantity,
        available,
    })
}

/// Gives back exactly the quantities recorded on the order's lines.
///
/// Returns the number of units restored.
pub async fn restore(tx: &mut dyn StoreTransaction, lines: &[OrderLine]) -> Result<u64> {
    let mut restored = 0u64;
    for line in lines {
        tx.increment_stock(line.product_id, line.quantity).await?;
        restored += u64::from(line.quantity);
    }
    Ok(restored)
}
