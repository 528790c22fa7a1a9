use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::transaction::{ModernTransaction, Product};

/// Product metadata lookup. The store answers asynchronously, and an unknown
/// identifier is not an error.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn product(&self, product_id: &str) -> Option<Product>;
}

/// The modern store API's transaction history.
#[async_trait]
pub trait TransactionFeed: Send + Sync {
    /// Latest transaction for every product the user is entitled to.
    async fn current_entitlements(&self) -> Vec<ModernTransaction>;

    /// Transactions purchased at or after `since`, oldest first.
    async fn transactions_since(&self, since: OffsetDateTime) -> Vec<ModernTransaction>;
}

/// The device's signed purchase receipt, if there is one.
pub trait ReceiptProvider: Send + Sync {
    fn receipt(&self) -> Option<Vec<u8>>;
}

#[derive(Clone, Default)]
pub struct StaticProductCatalog {
    products: HashMap<String, Product>,
}

impl StaticProductCatalog {
    pub fn new(products: Vec<Product>) -> StaticProductCatalog {
        StaticProductCatalog {
            products: products.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    pub fn with_product(mut self, product: Product) -> Self {
        self.products.insert(product.id.clone(), product);
        self
    }
}

#[async_trait]
impl ProductCatalog for StaticProductCatalog {
    async fn product(&self, product_id: &str) -> Option<Product> {
        self.products.get(product_id).cloned()
    }
}

/// A transaction history that can be appended to while being observed.
#[derive(Clone, Default)]
pub struct StaticTransactionFeed {
    entitlements: Arc<Mutex<Vec<ModernTransaction>>>,
    transactions: Arc<Mutex<Vec<ModernTransaction>>>,
}

impl StaticTransactionFeed {
    pub fn new() -> StaticTransactionFeed {
        StaticTransactionFeed::default()
    }

    pub fn push_entitlement(&self, transaction: ModernTransaction) {
        if let Ok(mut entitlements) = self.entitlements.lock() {
            entitlements.push(transaction);
        }
    }

    pub fn push_transaction(&self, transaction: ModernTransaction) {
        if let Ok(mut transactions) = self.transactions.lock() {
            transactions.push(transaction);
        }
    }
}

#[async_trait]
impl TransactionFeed for StaticTransactionFeed {
    async fn current_entitlements(&self) -> Vec<ModernTransaction> {
        self.entitlements
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    async fn transactions_since(&self, since: OffsetDateTime) -> Vec<ModernTransaction> {
        let Ok(transactions) = self.transactions.lock() else {
            return Vec::new();
        };

        let mut matching: Vec<ModernTransaction> = transactions
            .iter()
            .filter(|t| t.purchase_date >= since)
            .cloned()
            .collect();
        matching.sort_by_key(|t| t.purchase_date);
        matching
    }
}

#[derive(Clone, Default)]
pub struct StaticReceiptProvider {
    receipt: Option<Vec<u8>>,
}

impl StaticReceiptProvider {
    pub fn new(receipt: Option<Vec<u8>>) -> StaticReceiptProvider {
        StaticReceiptProvider { receipt }
    }
}

impl ReceiptProvider for StaticReceiptProvider {
    fn receipt(&self) -> Option<Vec<u8>> {
        self.receipt.clone()
    }
}
