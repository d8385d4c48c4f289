//! Integration test support for Quick Basket.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p quick-basket-integration-tests
//! ```
//!
//! # Contents
//!
//! - [`FakeCartService`] - in-memory [`RemoteCartService`] that records every
//!   call and can fail, hang, lose responses, or hold calls per product
//! - [`product`] / [`fast_config`] - fixtures
//!
//! Identity comes from [`quick_basket_cart::StaticIdentity`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::Semaphore;

use quick_basket_cart::{CartRow, RemoteCartService, RemoteError, SyncConfig};
use quick_basket_core::{CartRowId, ProductId, ProductSnapshot, UserId};

/// A remote call as received by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Fetch(UserId),
    Insert {
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    },
    Update {
        row_id: CartRowId,
        quantity: u32,
    },
    Delete(CartRowId),
    DeleteAll(UserId),
}

impl Call {
    /// Which operation this call was.
    #[must_use]
    pub const fn kind(&self) -> CallKind {
        match self {
            Self::Fetch(_) => CallKind::Fetch,
            Self::Insert { .. } => CallKind::Insert,
            Self::Update { .. } => CallKind::Update,
            Self::Delete(_) => CallKind::Delete,
            Self::DeleteAll(_) => CallKind::DeleteAll,
        }
    }
}

/// Remote operations, for scripting faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Fetch,
    Insert,
    Update,
    Delete,
    DeleteAll,
}

/// A scripted misbehaviour for the next call of a kind.
#[derive(Debug, Clone, Copy)]
enum Fault {
    Status(u16),
    Hang,
    /// The call takes effect but its answer never arrives.
    LoseResponse,
}

#[derive(Debug, Clone)]
struct StoredRow {
    id: CartRowId,
    user_id: UserId,
    quantity: u32,
    product: ProductSnapshot,
}

impl StoredRow {
    fn to_cart_row(&self) -> CartRow {
        CartRow {
            id: self.id,
            product_id: self.product.id,
            quantity: self.quantity,
            product: self.product.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct FakeState {
    catalog: HashMap<ProductId, ProductSnapshot>,
    rows: Vec<StoredRow>,
    calls: Vec<Call>,
    faults: HashMap<CallKind, VecDeque<Fault>>,
    gates: HashMap<ProductId, Arc<Semaphore>>,
}

/// In-memory cart service.
///
/// Behaves like the Supabase tables: inserting a product that is not in the
/// catalog, or a second row for the same user and product, fails with 409.
#[derive(Debug, Clone, Default)]
pub struct FakeCartService {
    state: Arc<Mutex<FakeState>>,
}

/// Holds every call touching one product until released.
#[derive(Debug, Clone)]
pub struct Gate {
    permits: Arc<Semaphore>,
}

impl Gate {
    /// Let one held call through.
    pub fn release_one(&self) {
        self.permits.add_permits(1);
    }

    /// Let every held and future call through.
    pub fn open(&self) {
        self.permits.close();
    }
}

impl FakeCartService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make a product insertable.
    pub fn add_product(&self, product: &ProductSnapshot) {
        self.lock().catalog.insert(product.id, product.clone());
    }

    /// Put a row in place without going through the engine.
    pub fn seed(&self, user_id: UserId, product: &ProductSnapshot, quantity: u32) -> CartRowId {
        let id = CartRowId::random();
        let mut state = self.lock();
        state.catalog.insert(product.id, product.clone());
        state.rows.push(StoredRow {
            id,
            user_id,
            quantity,
            product: product.clone(),
        });
        id
    }

    /// Fail the next call of `kind` with an HTTP status.
    pub fn fail_next(&self, kind: CallKind, status: u16) {
        self.lock()
            .faults
            .entry(kind)
            .or_default()
            .push_back(Fault::Status(status));
    }

    /// Make the next call of `kind` never complete.
    pub fn hang_next(&self, kind: CallKind) {
        self.lock()
            .faults
            .entry(kind)
            .or_default()
            .push_back(Fault::Hang);
    }

    /// Let the next call of `kind` take effect, then never answer it.
    pub fn lose_next_response(&self, kind: CallKind) {
        self.lock()
            .faults
            .entry(kind)
            .or_default()
            .push_back(Fault::LoseResponse);
    }

    /// Hold calls for `product_id` until the returned gate lets them through.
    #[must_use]
    pub fn hold(&self, product_id: ProductId) -> Gate {
        let permits = Arc::new(Semaphore::new(0));
        self.lock().gates.insert(product_id, Arc::clone(&permits));
        Gate { permits }
    }

    /// Every call received so far, in arrival order.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Calls of one kind.
    #[must_use]
    pub fn calls_of(&self, kind: CallKind) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.kind() == kind)
            .cloned()
            .collect()
    }

    /// Persisted rows for a user.
    #[must_use]
    pub fn rows(&self, user_id: UserId) -> Vec<CartRow> {
        self.lock()
            .rows
            .iter()
            .filter(|row| row.user_id == user_id)
            .map(StoredRow::to_cart_row)
            .collect()
    }

    /// Persisted quantity of one product for a user.
    #[must_use]
    pub fn quantity(&self, user_id: UserId, product_id: ProductId) -> Option<u32> {
        self.lock()
            .rows
            .iter()
            .find(|row| row.user_id == user_id && row.product.id == product_id)
            .map(|row| row.quantity)
    }

    /// Wait until at least `count` calls have arrived.
    ///
    /// # Panics
    ///
    /// Panics if they do not arrive within a second.
    pub async fn wait_for_calls(&self, count: usize) {
        let arrived = tokio::time::timeout(Duration::from_secs(1), async {
            while self.lock().calls.len() < count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await;
        assert!(arrived.is_ok(), "expected {count} calls, got {:?}", self.calls());
    }

    /// Record the call, wait at the product's gate, then apply any fault.
    /// Returns whether the answer is to be lost.
    async fn enter(&self, call: Call, product_id: Option<ProductId>) -> Result<bool, RemoteError> {
        let (gate, fault) = {
            let mut state = self.lock();
            let kind = call.kind();
            state.calls.push(call);
            let gate = product_id.and_then(|id| state.gates.get(&id).cloned());
            let fault = state.faults.get_mut(&kind).and_then(VecDeque::pop_front);
            (gate, fault)
        };

        if let Some(gate) = gate {
            // A closed gate lets everything through
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        match fault {
            None => Ok(false),
            Some(Fault::LoseResponse) => Ok(true),
            Some(Fault::Status(status)) => Err(RemoteError::Status {
                status,
                body: "injected failure".to_string(),
            }),
            Some(Fault::Hang) => std::future::pending().await,
        }
    }

    fn product_of_row(&self, row_id: CartRowId) -> Option<ProductId> {
        self.lock()
            .rows
            .iter()
            .find(|row| row.id == row_id)
            .map(|row| row.product.id)
    }
}

async fn answer<T>(lost: bool, value: T) -> Result<T, RemoteError> {
    if lost {
        std::future::pending::<()>().await;
    }
    Ok(value)
}

fn conflict(body: &str) -> RemoteError {
    RemoteError::Status {
        status: 409,
        body: body.to_string(),
    }
}

impl RemoteCartService for FakeCartService {
    async fn fetch_cart(&self, user_id: UserId) -> Result<Vec<CartRow>, RemoteError> {
        let lost = self.enter(Call::Fetch(user_id), None).await?;
        answer(lost, self.rows(user_id)).await
    }

    async fn insert_cart_row(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartRow, RemoteError> {
        let lost = self
            .enter(
                Call::Insert {
                    user_id,
                    product_id,
                    quantity,
                },
                Some(product_id),
            )
            .await?;

        let cart_row = {
            let mut state = self.lock();
            let product = state
                .catalog
                .get(&product_id)
                .cloned()
                .ok_or_else(|| conflict("violates foreign key constraint"))?;

            // UNIQUE (user_id, product_id)
            if state
                .rows
                .iter()
                .any(|row| row.user_id == user_id && row.product.id == product_id)
            {
                return Err(conflict("duplicate key value violates unique constraint"));
            }

            let row = StoredRow {
                id: CartRowId::random(),
                user_id,
                quantity,
                product,
            };
            let cart_row = row.to_cart_row();
            state.rows.push(row);
            cart_row
        };

        answer(lost, cart_row).await
    }

    async fn update_cart_row_quantity(
        &self,
        row_id: CartRowId,
        quantity: u32,
    ) -> Result<(), RemoteError> {
        let product_id = self.product_of_row(row_id);
        let lost = self
            .enter(Call::Update { row_id, quantity }, product_id)
            .await?;

        if let Some(row) = self.lock().rows.iter_mut().find(|row| row.id == row_id) {
            row.quantity = quantity;
        }
        answer(lost, ()).await
    }

    async fn delete_cart_row(&self, row_id: CartRowId) -> Result<(), RemoteError> {
        let product_id = self.product_of_row(row_id);
        let lost = self.enter(Call::Delete(row_id), product_id).await?;

        self.lock().rows.retain(|row| row.id != row_id);
        answer(lost, ()).await
    }

    async fn delete_all_cart_rows(&self, user_id: UserId) -> Result<(), RemoteError> {
        let lost = self.enter(Call::DeleteAll(user_id), None).await?;

        self.lock().rows.retain(|row| row.user_id != user_id);
        answer(lost, ()).await
    }
}

/// A catalog product with the given name and price.
#[must_use]
pub fn product(name: &str, price: i64) -> ProductSnapshot {
    ProductSnapshot {
        id: ProductId::random(),
        name: name.to_string(),
        price: Decimal::from(price),
        original_price: None,
        weight: Some("1 pc".to_string()),
        image_url: None,
        is_veg: true,
    }
}

/// Short timeouts and backoff so failure paths finish quickly.
#[must_use]
pub fn fast_config() -> SyncConfig {
    SyncConfig {
        remote_timeout: Duration::from_millis(200),
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        ..SyncConfig::default()
    }
}
