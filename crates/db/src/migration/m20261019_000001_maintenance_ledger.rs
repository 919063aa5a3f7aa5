//! Maintenance ledger schema.
//!
//! Creates the license lock rows and the three ledger tables. The CHECK
//! constraints mirror the in-memory invariants so a buggy writer is rejected
//! by the database as well.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(MAINTENANCE_LEDGER_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(
            "DROP TABLE IF EXISTS time_deductions CASCADE;
             DROP TABLE IF EXISTS time_expenditures CASCADE;
             DROP TABLE IF EXISTS time_credits CASCADE;
             DROP TABLE IF EXISTS licenses CASCADE;",
        )
        .await?;
        Ok(())
    }
}

const MAINTENANCE_LEDGER_SQL: &str = r"
-- ============================================================
-- LICENSES: per-license lock target and ledger version
-- ============================================================
CREATE TABLE licenses (
    id UUID PRIMARY KEY,
    ledger_version BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_ledger_version CHECK (ledger_version >= 0)
);

-- ============================================================
-- TIME CREDITS: granted hours valid over a date window
-- ============================================================
CREATE TABLE time_credits (
    id UUID PRIMARY KEY,
    license_id UUID NOT NULL REFERENCES licenses(id) ON DELETE CASCADE,
    start_date DATE NOT NULL,
    end_date DATE NOT NULL,
    credit_hours NUMERIC(10, 2) NOT NULL,
    remaining_hours NUMERIC(10, 2) NOT NULL,
    version BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_credit_window CHECK (start_date <= end_date),
    CONSTRAINT chk_credit_hours_positive CHECK (credit_hours > 0),
    CONSTRAINT chk_remaining_bounds CHECK (remaining_hours >= 0 AND remaining_hours <= credit_hours)
);

-- Allocation order: oldest validity window first
CREATE INDEX idx_time_credits_allocation ON time_credits(license_id, start_date, end_date, id);

-- ============================================================
-- TIME EXPENDITURES: logged support effort
-- ============================================================
CREATE TABLE time_expenditures (
    id UUID PRIMARY KEY,
    license_id UUID NOT NULL REFERENCES licenses(id) ON DELETE CASCADE,
    date DATE NOT NULL,
    hours_spent NUMERIC(10, 2) NOT NULL,
    created_debt NUMERIC(10, 2) NOT NULL DEFAULT 0,
    description TEXT,
    task_type VARCHAR(100),
    version BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_hours_spent_positive CHECK (hours_spent > 0),
    CONSTRAINT chk_debt_bounds CHECK (created_debt >= 0 AND created_debt <= hours_spent)
);

-- Backfill order: oldest debt first
CREATE INDEX idx_time_expenditures_debt ON time_expenditures(license_id, date, id)
    WHERE created_debt > 0;
CREATE INDEX idx_time_expenditures_license ON time_expenditures(license_id, date);

-- ============================================================
-- TIME DEDUCTIONS: hours of one credit paying for one expenditure
-- ============================================================
CREATE TABLE time_deductions (
    id UUID PRIMARY KEY,
    credit_id UUID NOT NULL REFERENCES time_credits(id) ON DELETE RESTRICT,
    expenditure_id UUID NOT NULL REFERENCES time_expenditures(id) ON DELETE RESTRICT,
    hours_deducted NUMERIC(10, 2) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_deduction_positive CHECK (hours_deducted > 0)
);

CREATE INDEX idx_time_deductions_credit ON time_deductions(credit_id);
CREATE INDEX idx_time_deductions_expenditure ON time_deductions(expenditure_id);

-- ============================================================
-- FUNCTION: check_deduction_license
-- Both ends of a deduction must belong to the same license
-- ============================================================
CREATE OR REPLACE FUNCTION check_deduction_license()
RETURNS TRIGGER AS $$
DECLARE
    credit_license UUID;
    expenditure_license UUID;
BEGIN
    SELECT license_id INTO credit_license FROM time_credits WHERE id = NEW.credit_id;
    SELECT license_id INTO expenditure_license FROM time_expenditures WHERE id = NEW.expenditure_id;

    IF credit_license IS DISTINCT FROM expenditure_license THEN
        RAISE EXCEPTION 'Deduction links credit % and expenditure % of different licenses',
            NEW.credit_id, NEW.expenditure_id;
    END IF;

    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

CREATE TRIGGER trg_check_deduction_license
BEFORE INSERT OR UPDATE ON time_deductions
FOR EACH ROW
EXECUTE FUNCTION check_deduction_license();
";
