//! Maintenance repository: persistence and locking for the time-credit ledger.
//!
//! Every mutation runs in one database transaction:
//! 1. `SELECT ... FOR UPDATE` on the license row (per-license exclusive lock)
//! 2. load the license ledger and apply the engine operation in memory
//! 3. verify the ledger invariants
//! 4. write the touched rows with version-checked updates
//!
//! Steps 1-4 run inside a savepoint. A version conflict rolls back to the
//! savepoint and the whole step is retried once.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    AccessMode, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbErr,
    EntityTrait, IsolationLevel, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use timebank_core::maintenance::{
    AllocationEngine, CreateTimeCreditInput, CreateTimeExpenditureInput, Deduction,
    LedgerChanges, LicenseLedger, MaintenanceBalance, MaintenanceError, Settlement,
    SettlementCache, SettlementCalculator, TimeCredit, TimeExpenditure,
};
use timebank_shared::config::{MaintenanceConfig, ReallocationPolicy};
use timebank_shared::AppError;
use timebank_shared::types::{DeductionId, Hours, LicenseId, TimeCreditId, TimeExpenditureId};

use crate::entities::{licenses, time_credits, time_deductions, time_expenditures};

/// Error types for maintenance repository operations.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// Domain error raised by the ledger engine or by a version conflict.
    #[error(transparent)]
    Maintenance(#[from] MaintenanceError),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl RepositoryError {
    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Maintenance(err) => err.error_code(),
            Self::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Returns true if the caller may retry the whole operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Maintenance(err) if err.is_retryable())
    }

    fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Maintenance(MaintenanceError::ConcurrentModification)
        )
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Maintenance(err) => err.into(),
            RepositoryError::Database(err) => Self::Database(err.to_string()),
        }
    }
}

/// Repository for the maintenance time-credit ledger.
#[derive(Clone)]
pub struct MaintenanceRepository {
    db: DatabaseConnection,
    policy: ReallocationPolicy,
    cache: SettlementCache,
}

impl MaintenanceRepository {
    /// Creates a repository with the default policy and cache settings.
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            policy: ReallocationPolicy::default(),
            cache: SettlementCache::new(),
        }
    }

    /// Creates a repository from the `maintenance` configuration section.
    #[must_use]
    pub fn with_config(db: DatabaseConnection, config: &MaintenanceConfig) -> Self {
        Self {
            db,
            policy: config.reallocation_policy,
            cache: SettlementCache::with_config(
                config.settlement_cache_capacity,
                config.settlement_cache_ttl_secs,
            ),
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Registers a license so credits and expenditures can be recorded.
    ///
    /// Registering an existing license is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn register_license(&self, license_id: LicenseId) -> Result<(), RepositoryError> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let license = licenses::ActiveModel {
            id: Set(license_id.into_inner()),
            ledger_version: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        };

        licenses::Entity::insert(license)
            .on_conflict(
                OnConflict::column(licenses::Column::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        info!(license_id = %license_id, "Registered license");
        Ok(())
    }

    /// Logs a time expenditure and allocates it against the license's credits.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `hours_spent` is not positive or has more than two decimals
    /// - The license is not registered
    /// - A concurrent modification persists after one retry
    /// - Database operation fails
    pub async fn create_expenditure(
        &self,
        input: CreateTimeExpenditureInput,
    ) -> Result<TimeExpenditure, RepositoryError> {
        ensure_storable(input.hours_spent)?;
        let license_id = input.license_id;

        self.mutate(license_id, |ledger| {
            let (id, changes) = AllocationEngine::record_expenditure(ledger, input.clone())?;
            let expenditure = ledger
                .expenditure(id)
                .cloned()
                .ok_or(MaintenanceError::ExpenditureNotFound(id))?;
            Ok((expenditure, changes))
        })
        .await
    }

    /// Grants a time credit and backfills existing debt with it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `credit_hours` is not positive or has more than two decimals
    /// - The window ends before it starts
    /// - The license is not registered
    /// - A concurrent modification persists after one retry
    /// - Database operation fails
    pub async fn create_credit(
        &self,
        input: CreateTimeCreditInput,
    ) -> Result<TimeCredit, RepositoryError> {
        ensure_storable(input.credit_hours)?;
        let license_id = input.license_id;

        self.mutate(license_id, |ledger| {
            let (id, changes) = AllocationEngine::record_credit(ledger, input.clone())?;
            let credit = ledger
                .credit(id)
                .cloned()
                .ok_or(MaintenanceError::CreditNotFound(id))?;
            Ok((credit, changes))
        })
        .await
    }

    /// Deletes a credit, turning its deductions back into debt.
    ///
    /// With [`ReallocationPolicy::Replay`] the license is replayed afterwards.
    ///
    /// # Errors
    ///
    /// Returns `CreditNotFound` if the credit does not belong to the license.
    pub async fn delete_credit(
        &self,
        license_id: LicenseId,
        credit_id: TimeCreditId,
    ) -> Result<TimeCredit, RepositoryError> {
        let policy = self.policy;
        self.mutate(license_id, |ledger| {
            AllocationEngine::delete_credit(ledger, credit_id, policy)
        })
        .await
    }

    /// Deletes an expenditure, giving its hours back to the credits it used.
    ///
    /// # Errors
    ///
    /// Returns `ExpenditureNotFound` if the expenditure does not belong to
    /// the license.
    pub async fn delete_expenditure(
        &self,
        license_id: LicenseId,
        expenditure_id: TimeExpenditureId,
    ) -> Result<TimeExpenditure, RepositoryError> {
        let policy = self.policy;
        self.mutate(license_id, |ledger| {
            AllocationEngine::delete_expenditure(ledger, expenditure_id, policy)
        })
        .await
    }

    /// Rebuilds every deduction of a license in chronological order.
    ///
    /// # Errors
    ///
    /// Returns an error if the license is unknown or the database fails.
    pub async fn rebuild_license(
        &self,
        license_id: LicenseId,
    ) -> Result<LedgerChanges, RepositoryError> {
        self.mutate(license_id, |ledger| {
            let changes = AllocationEngine::replay(ledger)?;
            Ok((changes.clone(), changes))
        })
        .await
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Loads a point-in-time snapshot of the license ledger.
    ///
    /// Runs in a read-only repeatable-read transaction without taking the
    /// license lock.
    ///
    /// # Errors
    ///
    /// Returns `LicenseNotFound` for an unregistered license.
    pub async fn load_ledger(
        &self,
        license_id: LicenseId,
    ) -> Result<LicenseLedger, RepositoryError> {
        let txn = self.begin_snapshot().await?;
        let ledger = Self::load_ledger_in(&txn, license_id).await?;
        txn.commit().await?;
        Ok(ledger)
    }

    /// Loads the license ledger through the caller's connection or transaction.
    ///
    /// # Errors
    ///
    /// Returns `LicenseNotFound` for an unregistered license.
    pub async fn load_ledger_in<C: ConnectionTrait>(
        conn: &C,
        license_id: LicenseId,
    ) -> Result<LicenseLedger, RepositoryError> {
        let license = licenses::Entity::find_by_id(license_id.into_inner())
            .one(conn)
            .await?
            .ok_or(MaintenanceError::LicenseNotFound(license_id))?;
        fetch_ledger(conn, &license).await
    }

    /// Lifetime totals of a license.
    ///
    /// # Errors
    ///
    /// Returns `LicenseNotFound` for an unregistered license.
    pub async fn calculate_maintenance_balance(
        &self,
        license_id: LicenseId,
    ) -> Result<MaintenanceBalance, RepositoryError> {
        let ledger = self.load_ledger(license_id).await?;
        Ok(SettlementCalculator::calculate_maintenance_balance(&ledger))
    }

    /// Lifetime totals of a license, read through the caller's connection.
    ///
    /// # Errors
    ///
    /// Returns `LicenseNotFound` for an unregistered license.
    pub async fn calculate_maintenance_balance_in<C: ConnectionTrait>(
        conn: &C,
        license_id: LicenseId,
    ) -> Result<MaintenanceBalance, RepositoryError> {
        let ledger = Self::load_ledger_in(conn, license_id).await?;
        Ok(SettlementCalculator::calculate_maintenance_balance(&ledger))
    }

    /// Settlement periods of a license, served from cache when the ledger
    /// version has not moved.
    ///
    /// # Errors
    ///
    /// Returns `LicenseNotFound` for an unregistered license.
    pub async fn calculate_interim_settlements(
        &self,
        license_id: LicenseId,
    ) -> Result<Arc<Vec<Settlement>>, RepositoryError> {
        let txn = self.begin_snapshot().await?;
        let license = licenses::Entity::find_by_id(license_id.into_inner())
            .one(&txn)
            .await?
            .ok_or(MaintenanceError::LicenseNotFound(license_id))?;

        if let Some(cached) = self.cache.get(license_id, license.ledger_version) {
            txn.commit().await?;
            debug!(
                license_id = %license_id,
                version = license.ledger_version,
                "Settlement cache hit"
            );
            return Ok(cached);
        }

        let ledger = fetch_ledger(&txn, &license).await?;
        txn.commit().await?;
        Ok(self.cache.settlements(&ledger))
    }

    /// Settlement periods computed through the caller's connection, uncached.
    ///
    /// Use inside a transaction that also mutates the license to get a
    /// consistent invoice snapshot.
    ///
    /// # Errors
    ///
    /// Returns `LicenseNotFound` for an unregistered license.
    pub async fn calculate_interim_settlements_in<C: ConnectionTrait>(
        conn: &C,
        license_id: LicenseId,
    ) -> Result<Vec<Settlement>, RepositoryError> {
        let ledger = Self::load_ledger_in(conn, license_id).await?;
        Ok(SettlementCalculator::calculate_interim_settlements(&ledger))
    }

    // ========================================================================
    // Transaction plumbing
    // ========================================================================

    async fn begin_snapshot(&self) -> Result<DatabaseTransaction, DbErr> {
        self.db
            .begin_with_config(
                Some(IsolationLevel::RepeatableRead),
                Some(AccessMode::ReadOnly),
            )
            .await
    }

    /// Runs one engine operation under the license lock and commits it.
    async fn mutate<T, F>(&self, license_id: LicenseId, op: F) -> Result<T, RepositoryError>
    where
        F: Fn(&mut LicenseLedger) -> Result<(T, LedgerChanges), MaintenanceError>,
    {
        let txn = self.db.begin().await?;

        let result = match Self::apply(&txn, license_id, &op).await {
            Err(err) if err.is_conflict() => {
                warn!(license_id = %license_id, "Concurrent modification, retrying once");
                Self::apply(&txn, license_id, &op).await
            }
            other => other,
        };

        match result {
            Ok(value) => {
                txn.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let RepositoryError::Maintenance(domain) = &err
                    && domain.is_fatal()
                {
                    error!(
                        license_id = %license_id,
                        error = %domain,
                        "Ledger invariant violated, rolling back"
                    );
                }
                txn.rollback().await?;
                Err(err)
            }
        }
    }

    /// One attempt of a mutation, isolated in a savepoint.
    async fn apply<T, F>(
        txn: &DatabaseTransaction,
        license_id: LicenseId,
        op: &F,
    ) -> Result<T, RepositoryError>
    where
        F: Fn(&mut LicenseLedger) -> Result<(T, LedgerChanges), MaintenanceError>,
    {
        let savepoint = txn.begin().await?;

        let outcome: Result<T, RepositoryError> = async {
            let license = licenses::Entity::find_by_id(license_id.into_inner())
                .lock_exclusive()
                .one(&savepoint)
                .await?
                .ok_or(MaintenanceError::LicenseNotFound(license_id))?;

            let before = fetch_ledger(&savepoint, &license).await?;
            let mut after = before.clone();
            let (value, changes) = op(&mut after)?;
            after.verify()?;

            persist(&savepoint, &before, &after, &changes).await?;

            info!(
                license_id = %license_id,
                version = after.version(),
                deductions_created = changes.deductions_created.len(),
                deductions_deleted = changes.deductions_deleted.len(),
                "Maintenance ledger updated"
            );
            Ok(value)
        }
        .await;

        match outcome {
            Ok(value) => {
                savepoint.commit().await?;
                Ok(value)
            }
            Err(err) => {
                savepoint.rollback().await?;
                Err(err)
            }
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

async fn fetch_ledger<C: ConnectionTrait>(
    conn: &C,
    license: &licenses::Model,
) -> Result<LicenseLedger, RepositoryError> {
    let credits = time_credits::Entity::find()
        .filter(time_credits::Column::LicenseId.eq(license.id))
        .order_by_asc(time_credits::Column::Id)
        .all(conn)
        .await?;

    let expenditures = time_expenditures::Entity::find()
        .filter(time_expenditures::Column::LicenseId.eq(license.id))
        .order_by_asc(time_expenditures::Column::Id)
        .all(conn)
        .await?;

    let deductions = time_deductions::Entity::find()
        .inner_join(time_credits::Entity)
        .filter(time_credits::Column::LicenseId.eq(license.id))
        .order_by_asc(time_deductions::Column::CreatedAt)
        .order_by_asc(time_deductions::Column::Id)
        .all(conn)
        .await?;

    let ledger = LicenseLedger::from_parts(
        LicenseId::from_uuid(license.id),
        license.ledger_version,
        credits.into_iter().map(credit_from_model).collect(),
        expenditures.into_iter().map(expenditure_from_model).collect(),
        deductions.into_iter().map(deduction_from_model).collect(),
    )?;
    Ok(ledger)
}

// ============================================================================
// Persisting
// ============================================================================

/// Writes the row changes of one engine operation.
///
/// Order matters for the foreign keys: stale deductions go first, new rows
/// before the deductions that reference them, removed rows last.
async fn persist(
    txn: &DatabaseTransaction,
    before: &LicenseLedger,
    after: &LicenseLedger,
    changes: &LedgerChanges,
) -> Result<(), RepositoryError> {
    if changes.is_empty() {
        return Ok(());
    }
    let now: DateTimeWithTimeZone = Utc::now().into();

    delete_deductions(txn, &changes.deductions_deleted).await?;

    for &id in &changes.credits_created {
        let credit = after.credit(id).ok_or(MaintenanceError::CreditNotFound(id))?;
        time_credits::Entity::insert(credit_active_model(credit, now))
            .exec_without_returning(txn)
            .await?;
    }
    for &id in &changes.expenditures_created {
        let expenditure = after
            .expenditure(id)
            .ok_or(MaintenanceError::ExpenditureNotFound(id))?;
        time_expenditures::Entity::insert(expenditure_active_model(expenditure, now))
            .exec_without_returning(txn)
            .await?;
    }

    for &id in &changes.credits_updated {
        let credit = after.credit(id).ok_or(MaintenanceError::CreditNotFound(id))?;
        let result = time_credits::Entity::update_many()
            .col_expr(
                time_credits::Column::RemainingHours,
                Expr::value(credit.remaining_hours.value()),
            )
            .col_expr(
                time_credits::Column::Version,
                Expr::col(time_credits::Column::Version).add(1),
            )
            .col_expr(time_credits::Column::UpdatedAt, Expr::value(now))
            .filter(time_credits::Column::Id.eq(id.into_inner()))
            .filter(time_credits::Column::Version.eq(credit.version))
            .exec(txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(MaintenanceError::ConcurrentModification.into());
        }
    }
    for &id in &changes.expenditures_updated {
        let expenditure = after
            .expenditure(id)
            .ok_or(MaintenanceError::ExpenditureNotFound(id))?;
        let result = time_expenditures::Entity::update_many()
            .col_expr(
                time_expenditures::Column::CreatedDebt,
                Expr::value(expenditure.created_debt.value()),
            )
            .col_expr(
                time_expenditures::Column::Version,
                Expr::col(time_expenditures::Column::Version).add(1),
            )
            .col_expr(time_expenditures::Column::UpdatedAt, Expr::value(now))
            .filter(time_expenditures::Column::Id.eq(id.into_inner()))
            .filter(time_expenditures::Column::Version.eq(expenditure.version))
            .exec(txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(MaintenanceError::ConcurrentModification.into());
        }
    }

    for &id in &changes.deductions_created {
        let deduction = after.deduction(id).ok_or_else(|| {
            MaintenanceError::Internal(format!("created deduction {id} missing from ledger"))
        })?;
        time_deductions::Entity::insert(deduction_active_model(deduction))
            .exec_without_returning(txn)
            .await?;
    }

    for &id in &changes.credits_deleted {
        let version = before
            .credit(id)
            .map(|c| c.version)
            .ok_or(MaintenanceError::CreditNotFound(id))?;
        let result = time_credits::Entity::delete_many()
            .filter(time_credits::Column::Id.eq(id.into_inner()))
            .filter(time_credits::Column::Version.eq(version))
            .exec(txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(MaintenanceError::ConcurrentModification.into());
        }
    }
    for &id in &changes.expenditures_deleted {
        let version = before
            .expenditure(id)
            .map(|e| e.version)
            .ok_or(MaintenanceError::ExpenditureNotFound(id))?;
        let result = time_expenditures::Entity::delete_many()
            .filter(time_expenditures::Column::Id.eq(id.into_inner()))
            .filter(time_expenditures::Column::Version.eq(version))
            .exec(txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(MaintenanceError::ConcurrentModification.into());
        }
    }

    let result = licenses::Entity::update_many()
        .col_expr(licenses::Column::LedgerVersion, Expr::value(after.version()))
        .col_expr(licenses::Column::UpdatedAt, Expr::value(now))
        .filter(licenses::Column::Id.eq(after.license_id().into_inner()))
        .filter(licenses::Column::LedgerVersion.eq(before.version()))
        .exec(txn)
        .await?;
    if result.rows_affected == 0 {
        return Err(MaintenanceError::ConcurrentModification.into());
    }

    Ok(())
}

async fn delete_deductions(
    txn: &DatabaseTransaction,
    ids: &[DeductionId],
) -> Result<(), RepositoryError> {
    if ids.is_empty() {
        return Ok(());
    }
    let expected = u64::try_from(ids.len()).unwrap_or(u64::MAX);
    let uuids: Vec<Uuid> = ids.iter().map(|id| id.into_inner()).collect();

    let result = time_deductions::Entity::delete_many()
        .filter(time_deductions::Column::Id.is_in(uuids))
        .exec(txn)
        .await?;
    if result.rows_affected != expected {
        return Err(MaintenanceError::ConcurrentModification.into());
    }
    Ok(())
}

/// Largest value a `NUMERIC(10, 2)` column holds.
fn max_storable_hours() -> Hours {
    Hours::new(Decimal::new(9_999_999_999, 2))
}

/// Rejects hours the `NUMERIC(10, 2)` columns would round or overflow.
fn ensure_storable(hours: Hours) -> Result<(), MaintenanceError> {
    if hours.rounded() == hours && hours <= max_storable_hours() {
        Ok(())
    } else {
        Err(MaintenanceError::InvalidAmount(hours))
    }
}

// ============================================================================
// Row conversions
// ============================================================================

fn credit_from_model(model: time_credits::Model) -> TimeCredit {
    TimeCredit {
        id: TimeCreditId::from_uuid(model.id),
        license_id: LicenseId::from_uuid(model.license_id),
        start_date: model.start_date,
        end_date: model.end_date,
        credit_hours: Hours::new(model.credit_hours),
        remaining_hours: Hours::new(model.remaining_hours),
        created_at: model.created_at.with_timezone(&Utc),
        version: model.version,
    }
}

fn expenditure_from_model(model: time_expenditures::Model) -> TimeExpenditure {
    TimeExpenditure {
        id: TimeExpenditureId::from_uuid(model.id),
        license_id: LicenseId::from_uuid(model.license_id),
        date: model.date,
        hours_spent: Hours::new(model.hours_spent),
        created_debt: Hours::new(model.created_debt),
        description: model.description,
        task_type: model.task_type,
        created_at: model.created_at.with_timezone(&Utc),
        version: model.version,
    }
}

fn deduction_from_model(model: time_deductions::Model) -> Deduction {
    Deduction {
        id: DeductionId::from_uuid(model.id),
        credit_id: TimeCreditId::from_uuid(model.credit_id),
        expenditure_id: TimeExpenditureId::from_uuid(model.expenditure_id),
        hours_deducted: Hours::new(model.hours_deducted),
        created_at: model.created_at.with_timezone(&Utc),
    }
}

fn credit_active_model(
    credit: &TimeCredit,
    now: DateTimeWithTimeZone,
) -> time_credits::ActiveModel {
    time_credits::ActiveModel {
        id: Set(credit.id.into_inner()),
        license_id: Set(credit.license_id.into_inner()),
        start_date: Set(credit.start_date),
        end_date: Set(credit.end_date),
        credit_hours: Set(Decimal::from(credit.credit_hours)),
        remaining_hours: Set(Decimal::from(credit.remaining_hours)),
        version: Set(credit.version),
        created_at: Set(credit.created_at.into()),
        updated_at: Set(now),
    }
}

fn expenditure_active_model(
    expenditure: &TimeExpenditure,
    now: DateTimeWithTimeZone,
) -> time_expenditures::ActiveModel {
    time_expenditures::ActiveModel {
        id: Set(expenditure.id.into_inner()),
        license_id: Set(expenditure.license_id.into_inner()),
        date: Set(expenditure.date),
        hours_spent: Set(Decimal::from(expenditure.hours_spent)),
        created_debt: Set(Decimal::from(expenditure.created_debt)),
        description: Set(expenditure.description.clone()),
        task_type: Set(expenditure.task_type.clone()),
        version: Set(expenditure.version),
        created_at: Set(expenditure.created_at.into()),
        updated_at: Set(now),
    }
}

fn deduction_active_model(deduction: &Deduction) -> time_deductions::ActiveModel {
    time_deductions::ActiveModel {
        id: Set(deduction.id.into_inner()),
        credit_id: Set(deduction.credit_id.into_inner()),
        expenditure_id: Set(deduction.expenditure_id.into_inner()),
        hours_deducted: Set(Decimal::from(deduction.hours_deducted)),
        created_at: Set(deduction.created_at.into()),
    }
}
