use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, OnConflict, Query},
    ActiveValue::{NotSet, Set},
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, TransactionTrait,
};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, instrument, warn};
use uuid::Uuid;

use super::{contiguous_checkpoint, CommitOutcome, DocumentChange, SyncStore};
use crate::entities::{
    customer, customer_address, document_line, financial_document, page_progress,
    pricing_profile, settlement_record, sync_record, territory,
};
use crate::errors::ServiceError;
use crate::models::{
    from_minor, to_minor, Address, AddressKind, Charge, CheckpointCursor, Customer, CustomerKey,
    DeliverySlot, DocumentState, FinancialDocument, InvoiceLine, LineKind, OrderStatus,
    PaymentCategory, PricingContext, PricingProfile, PricingSource, SettlementRecord,
    SettlementStatus, SyncOrigin, SyncOutcome, SyncRecord, Territory,
};

/// Store backed by the business system's relational database.
#[derive(Debug, Clone)]
pub struct SeaOrmSyncStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmSyncStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    async fn load_document(
        &self,
        model: Option<financial_document::Model>,
    ) -> Result<Option<FinancialDocument>, ServiceError> {
        let Some(model) = model else {
            return Ok(None);
        };
        let lines = document_line::Entity::find()
            .filter(document_line::Column::DocumentId.eq(model.id))
            .order_by_asc(document_line::Column::Position)
            .all(&*self.db)
            .await?;
        document_from_models(model, lines).map(Some)
    }
}

fn corrupt(field: &str, value: &str) -> ServiceError {
    ServiceError::SerializationError(format!("stored {} '{}' is not recognised", field, value))
}

fn record_to_active(record: &SyncRecord) -> sync_record::ActiveModel {
    sync_record::ActiveModel {
        external_order_id: Set(record.external_order_id),
        document_id: Set(record.document_id),
        last_status: Set(record.last_status.as_str().to_string()),
        last_external_update: Set(record.last_external_update),
        content_hash: Set(record.content_hash.clone()),
        outcome: Set(record.outcome.to_string()),
        origin: Set(record.origin.to_string()),
        source_page: Set(record.source_page.map(|p| p as i32)),
        last_error: Set(record.last_error.clone()),
        synced_at: Set(record.synced_at),
    }
}

fn record_from_model(model: sync_record::Model) -> Result<SyncRecord, ServiceError> {
    Ok(SyncRecord {
        external_order_id: model.external_order_id,
        document_id: model.document_id,
        last_status: OrderStatus::parse(&model.last_status),
        last_external_update: model.last_external_update,
        content_hash: model.content_hash,
        outcome: SyncOutcome::from_str(&model.outcome)
            .map_err(|_| corrupt("outcome", &model.outcome))?,
        origin: SyncOrigin::from_str(&model.origin)
            .map_err(|_| corrupt("origin", &model.origin))?,
        source_page: model.source_page.and_then(|p| u32::try_from(p).ok()),
        last_error: model.last_error,
        synced_at: model.synced_at,
    })
}

fn document_to_active(
    document: &FinancialDocument,
) -> Result<financial_document::ActiveModel, ServiceError> {
    Ok(financial_document::ActiveModel {
        id: Set(document.id),
        external_order_id: Set(document.external_order_id),
        order_number: Set(document.order_number.clone()),
        state: Set(document.state.to_string()),
        customer_id: Set(document.customer_id),
        billing_address_id: Set(document.billing_address_id),
        shipping_address_id: Set(document.shipping_address_id),
        territory: Set(document.territory.clone()),
        warehouse: Set(document.pricing.warehouse.clone()),
        price_list: Set(document.pricing.price_list.clone()),
        company: Set(document.pricing.company.clone()),
        pricing_profile: Set(document.pricing.profile_ref.clone()),
        pricing_source: Set(document.pricing.source.to_string()),
        currency: Set(document.currency.clone()),
        charges: Set(serde_json::to_value(&document.charges)?),
        payment_category: Set(document.payment_category.map(|c| c.to_string())),
        settlement_status: Set(document.settlement_status.to_string()),
        fulfilment_state: Set(document.fulfilment_state.clone()),
        delivery_date: Set(document.delivery_slot.map(|s| s.date)),
        delivery_time_from: Set(document.delivery_slot.map(|s| s.time_from)),
        delivery_duration_minutes: Set(document.delivery_slot.map(|s| s.duration_minutes as i32)),
        total_minor: Set(to_minor(document.total())?),
        version: Set(document.version),
        created_at: Set(document.created_at),
        updated_at: Set(document.updated_at),
    })
}

fn line_kind_parts(kind: LineKind) -> (&'static str, Option<i64>) {
    match kind {
        LineKind::Plain => ("plain", None),
        LineKind::BundleParent => ("bundle_parent", None),
        LineKind::BundleChild { parent_line_id } => ("bundle_child", Some(parent_line_id)),
    }
}

fn line_to_active(
    document_id: Uuid,
    position: usize,
    line: &InvoiceLine,
) -> Result<document_line::ActiveModel, ServiceError> {
    let (kind, parent_line_id) = line_kind_parts(line.kind);
    Ok(document_line::ActiveModel {
        id: Set(Uuid::new_v4()),
        document_id: Set(document_id),
        position: Set(position as i32),
        external_line_id: Set(line.external_line_id),
        item_ref: Set(line.item_ref.clone()),
        name: Set(line.name.clone()),
        quantity: Set(line.quantity),
        rate: Set(line.rate.to_string()),
        discount_percentage: Set(line.discount_percentage.to_string()),
        net_minor: Set(to_minor(line.net_amount)?),
        kind: Set(kind.to_string()),
        parent_line_id: Set(parent_line_id),
    })
}

fn line_from_model(model: document_line::Model) -> Result<InvoiceLine, ServiceError> {
    let kind = match (model.kind.as_str(), model.parent_line_id) {
        ("plain", _) => LineKind::Plain,
        ("bundle_parent", _) => LineKind::BundleParent,
        ("bundle_child", Some(parent_line_id)) => LineKind::BundleChild { parent_line_id },
        _ => return Err(corrupt("line kind", &model.kind)),
    };
    Ok(InvoiceLine {
        external_line_id: model.external_line_id,
        item_ref: model.item_ref,
        name: model.name,
        quantity: model.quantity,
        rate: Decimal::from_str(&model.rate).map_err(|_| corrupt("rate", &model.rate))?,
        discount_percentage: Decimal::from_str(&model.discount_percentage)
            .map_err(|_| corrupt("discount_percentage", &model.discount_percentage))?,
        net_amount: from_minor(model.net_minor),
        kind,
    })
}

fn document_from_models(
    model: financial_document::Model,
    lines: Vec<document_line::Model>,
) -> Result<FinancialDocument, ServiceError> {
    let delivery_slot = match (
        model.delivery_date,
        model.delivery_time_from,
        model.delivery_duration_minutes,
    ) {
        (Some(date), Some(time_from), Some(minutes)) => Some(DeliverySlot {
            date,
            time_from,
            duration_minutes: u32::try_from(minutes).unwrap_or_default(),
        }),
        _ => None,
    };
    let charges: Vec<Charge> = serde_json::from_value(model.charges)?;
    let payment_category = match model.payment_category.as_deref() {
        Some(label) => Some(
            PaymentCategory::parse_label(label).ok_or_else(|| corrupt("payment category", label))?,
        ),
        None => None,
    };

    Ok(FinancialDocument {
        id: model.id,
        external_order_id: model.external_order_id,
        order_number: model.order_number,
        state: DocumentState::from_str(&model.state).map_err(|_| corrupt("state", &model.state))?,
        customer_id: model.customer_id,
        billing_address_id: model.billing_address_id,
        shipping_address_id: model.shipping_address_id,
        territory: model.territory,
        pricing: PricingContext {
            warehouse: model.warehouse,
            price_list: model.price_list,
            company: model.company,
            profile_ref: model.pricing_profile,
            source: match model.pricing_source.as_str() {
                "profile" => PricingSource::Profile,
                "partial" => PricingSource::Partial,
                _ => PricingSource::Defaults,
            },
        },
        currency: model.currency,
        lines: lines
            .into_iter()
            .map(line_from_model)
            .collect::<Result<_, _>>()?,
        charges,
        payment_category,
        settlement_status: SettlementStatus::from_str(&model.settlement_status)
            .map_err(|_| corrupt("settlement status", &model.settlement_status))?,
        fulfilment_state: model.fulfilment_state,
        delivery_slot,
        version: model.version,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

fn customer_to_active(customer: &Customer) -> customer::ActiveModel {
    customer::ActiveModel {
        id: Set(customer.id),
        match_key: Set(customer.match_key.clone()),
        external_id: Set(customer.external_id.clone()),
        display_name: Set(customer.display_name.clone()),
        email: Set(customer.email.clone()),
        phone: Set(customer.phone.clone()),
        territory: Set(customer.territory.clone()),
        territory_locked: Set(customer.territory_locked),
        created_at: Set(customer.created_at),
        updated_at: Set(customer.updated_at),
    }
}

fn customer_from_model(model: customer::Model) -> Customer {
    Customer {
        id: model.id,
        match_key: model.match_key,
        external_id: model.external_id,
        display_name: model.display_name,
        email: model.email,
        phone: model.phone,
        territory: model.territory,
        territory_locked: model.territory_locked,
        created_at: model.created_at,
        updated_at: model.updated_at,
    }
}

fn address_to_active(address: &Address) -> customer_address::ActiveModel {
    customer_address::ActiveModel {
        id: Set(address.id),
        customer_id: Set(address.customer_id),
        fingerprint: Set(address.fingerprint.clone()),
        address_line_1: Set(address.line1.clone()),
        address_line_2: Set(address.line2.clone()),
        city: Set(address.city.clone()),
        state: Set(address.state.clone()),
        postal_code: Set(address.postcode.clone()),
        country_code: Set(address.country.clone()),
        phone: Set(address.phone.clone()),
        is_default_billing: Set(address.is_default_billing),
        is_default_shipping: Set(address.is_default_shipping),
        created_at: Set(address.created_at),
    }
}

fn address_from_model(model: customer_address::Model) -> Address {
    Address {
        id: model.id,
        customer_id: model.customer_id,
        fingerprint: model.fingerprint,
        line1: model.address_line_1,
        line2: model.address_line_2,
        city: model.city,
        state: model.state,
        postcode: model.postal_code,
        country: model.country_code,
        phone: model.phone,
        is_default_billing: model.is_default_billing,
        is_default_shipping: model.is_default_shipping,
        created_at: model.created_at,
    }
}

fn territory_from_model(model: territory::Model) -> Result<Territory, ServiceError> {
    Ok(Territory {
        labels: serde_json::from_value(model.labels)?,
        code: model.code,
        pricing_profile: model.pricing_profile,
        delivery_charge: model.delivery_charge_minor.map(from_minor),
    })
}

fn profile_from_model(model: pricing_profile::Model) -> PricingProfile {
    PricingProfile {
        name: model.name,
        warehouse: model.warehouse,
        price_list: model.price_list,
        company: model.company,
    }
}

fn settlement_from_model(model: settlement_record::Model) -> Result<SettlementRecord, ServiceError> {
    Ok(SettlementRecord {
        id: model.id,
        document_id: model.document_id,
        category: PaymentCategory::parse_label(&model.category)
            .ok_or_else(|| corrupt("settlement category", &model.category))?,
        idempotency_key: model.idempotency_key,
        amount: from_minor(model.amount_minor),
        account: model.account,
        reference: model.reference,
        created_at: model.created_at,
    })
}

fn default_flag_column(kind: AddressKind) -> customer_address::Column {
    match kind {
        AddressKind::Billing => customer_address::Column::IsDefaultBilling,
        AddressKind::Shipping => customer_address::Column::IsDefaultShipping,
    }
}

fn customer_key_condition(key: &CustomerKey) -> Condition {
    let by_field = match key {
        CustomerKey::ExternalId(id) => customer::Column::ExternalId.eq(id.clone()),
        CustomerKey::Email(email) => customer::Column::Email.eq(email.clone()),
        CustomerKey::Phone(phone) => customer::Column::Phone.eq(phone.clone()),
    };
    Condition::any()
        .add(customer::Column::MatchKey.eq(key.match_key()))
        .add(by_field)
}

async fn insert_lines<C: ConnectionTrait>(
    conn: &C,
    document: &FinancialDocument,
) -> Result<(), ServiceError> {
    if document.lines.is_empty() {
        return Ok(());
    }
    let lines = document
        .lines
        .iter()
        .enumerate()
        .map(|(position, line)| line_to_active(document.id, position, line))
        .collect::<Result<Vec<_>, ServiceError>>()?;
    document_line::Entity::insert_many(lines)
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

async fn upsert_record<C: ConnectionTrait>(conn: &C, record: &SyncRecord) -> Result<(), ServiceError> {
    sync_record::Entity::insert(record_to_active(record))
        .on_conflict(
            OnConflict::column(sync_record::Column::ExternalOrderId)
                .update_columns([
                    sync_record::Column::LastStatus,
                    sync_record::Column::LastExternalUpdate,
                    sync_record::Column::ContentHash,
                    sync_record::Column::Outcome,
                    sync_record::Column::Origin,
                    sync_record::Column::SourcePage,
                    sync_record::Column::LastError,
                    sync_record::Column::SyncedAt,
                ])
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

async fn insert_settlement<C: ConnectionTrait>(
    conn: &C,
    settlement: &Option<SettlementRecord>,
) -> Result<(), ServiceError> {
    let Some(settlement) = settlement else {
        return Ok(());
    };
    let active = settlement_record::ActiveModel {
        id: Set(settlement.id),
        document_id: Set(settlement.document_id),
        idempotency_key: Set(settlement.idempotency_key.clone()),
        amount_minor: Set(to_minor(settlement.amount)?),
        category: Set(settlement.category.to_string()),
        account: Set(settlement.account.clone()),
        reference: Set(settlement.reference.clone()),
        created_at: Set(settlement.created_at),
    };
    settlement_record::Entity::insert(active)
        // Either the per-document or the idempotency key index may fire first.
        .on_conflict(OnConflict::new().do_nothing().to_owned())
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

async fn apply_change<C: ConnectionTrait>(
    conn: &C,
    change: &DocumentChange,
) -> Result<CommitOutcome, ServiceError> {
    match change {
        DocumentChange::Create {
            document,
            record,
            settlement,
        } => {
            let inserted = financial_document::Entity::insert(document_to_active(document)?)
                .on_conflict(
                    OnConflict::column(financial_document::Column::ExternalOrderId)
                        .do_nothing()
                        .to_owned(),
                )
                .exec_without_returning(conn)
                .await?;
            if inserted == 0 {
                return Ok(CommitOutcome::AlreadyExists);
            }
            insert_lines(conn, document).await?;
            upsert_record(conn, record).await?;
            insert_settlement(conn, settlement).await?;
            Ok(CommitOutcome::Applied)
        }
        DocumentChange::Update {
            document,
            expected_version,
            replace_lines,
            record,
            settlement,
        } => {
            let mut active = document_to_active(document)?;
            active.id = NotSet;
            active.external_order_id = NotSet;
            active.created_at = NotSet;
            let result = financial_document::Entity::update_many()
                .set(active)
                .filter(financial_document::Column::Id.eq(document.id))
                .filter(financial_document::Column::Version.eq(*expected_version))
                .exec(conn)
                .await?;
            if result.rows_affected == 0 {
                return Ok(CommitOutcome::VersionConflict);
            }
            if *replace_lines {
                document_line::Entity::delete_many()
                    .filter(document_line::Column::DocumentId.eq(document.id))
                    .exec(conn)
                    .await?;
                insert_lines(conn, document).await?;
            }
            upsert_record(conn, record).await?;
            insert_settlement(conn, settlement).await?;
            Ok(CommitOutcome::Applied)
        }
        DocumentChange::Touch { record } => {
            sync_record::Entity::update_many()
                .col_expr(
                    sync_record::Column::Outcome,
                    Expr::value(record.outcome.to_string()),
                )
                .col_expr(
                    sync_record::Column::Origin,
                    Expr::value(record.origin.to_string()),
                )
                .col_expr(
                    sync_record::Column::LastError,
                    Expr::value(record.last_error.clone()),
                )
                .col_expr(sync_record::Column::SyncedAt, Expr::value(record.synced_at))
                .filter(sync_record::Column::ExternalOrderId.eq(record.external_order_id))
                .exec(conn)
                .await?;
            Ok(CommitOutcome::Applied)
        }
    }
}

#[async_trait]
impl SyncStore for SeaOrmSyncStore {
    async fn get_sync_record(
        &self,
        external_order_id: i64,
    ) -> Result<Option<SyncRecord>, ServiceError> {
        sync_record::Entity::find_by_id(external_order_id)
            .one(&*self.db)
            .await?
            .map(record_from_model)
            .transpose()
    }

    async fn get_sync_records(
        &self,
        external_order_ids: &[i64],
    ) -> Result<Vec<SyncRecord>, ServiceError> {
        if external_order_ids.is_empty() {
            return Ok(Vec::new());
        }
        sync_record::Entity::find()
            .filter(sync_record::Column::ExternalOrderId.is_in(external_order_ids.iter().copied()))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(record_from_model)
            .collect()
    }

    async fn record_failure(
        &self,
        external_order_id: i64,
        origin: SyncOrigin,
        error: &str,
    ) -> Result<(), ServiceError> {
        sync_record::Entity::update_many()
            .col_expr(
                sync_record::Column::Outcome,
                Expr::value(SyncOutcome::Errored.to_string()),
            )
            .col_expr(sync_record::Column::Origin, Expr::value(origin.to_string()))
            .col_expr(sync_record::Column::LastError, Expr::value(error.to_string()))
            .col_expr(
                sync_record::Column::SyncedAt,
                Expr::value(chrono::Utc::now()),
            )
            .filter(sync_record::Column::ExternalOrderId.eq(external_order_id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    async fn checkpoint(&self) -> Result<CheckpointCursor, ServiceError> {
        let pages: Vec<i32> = sync_record::Entity::find()
            .select_only()
            .column(sync_record::Column::SourcePage)
            .filter(sync_record::Column::SourcePage.is_not_null())
            .distinct()
            .into_tuple()
            .all(&*self.db)
            .await?;
        let marked: Vec<i32> = page_progress::Entity::find()
            .select_only()
            .column(page_progress::Column::Page)
            .into_tuple()
            .all(&*self.db)
            .await?;
        let pages = pages
            .into_iter()
            .chain(marked)
            .filter_map(|p| u32::try_from(p).ok())
            .collect();
        let mut cursor = contiguous_checkpoint(pages, |_| None);
        if cursor.last_page > 0 {
            cursor.last_external_id = sync_record::Entity::find()
                .filter(sync_record::Column::SourcePage.eq(cursor.last_page as i32))
                .order_by_desc(sync_record::Column::ExternalOrderId)
                .one(&*self.db)
                .await?
                .map(|m| m.external_order_id);
        }
        Ok(cursor)
    }

    async fn mark_page_done(&self, page: u32) -> Result<(), ServiceError> {
        let page = i32::try_from(page).map_err(|_| {
            ServiceError::ValidationError(format!("page {} out of range", page))
        })?;
        page_progress::Entity::insert(page_progress::ActiveModel {
            page: Set(page),
            completed_at: Set(chrono::Utc::now()),
        })
        .on_conflict(
            OnConflict::column(page_progress::Column::Page)
                .update_column(page_progress::Column::CompletedAt)
                .to_owned(),
        )
        .exec_without_returning(&*self.db)
        .await?;
        Ok(())
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<FinancialDocument>, ServiceError> {
        let model = financial_document::Entity::find_by_id(id)
            .one(&*self.db)
            .await?;
        self.load_document(model).await
    }

    async fn get_document_by_external_id(
        &self,
        external_order_id: i64,
    ) -> Result<Option<FinancialDocument>, ServiceError> {
        let model = financial_document::Entity::find()
            .filter(financial_document::Column::ExternalOrderId.eq(external_order_id))
            .one(&*self.db)
            .await?;
        self.load_document(model).await
    }

    #[instrument(skip(self, change), fields(external_id = change.external_order_id()))]
    async fn commit(&self, change: DocumentChange) -> Result<CommitOutcome, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        let outcome = apply_change(&txn, &change).await?;
        if outcome == CommitOutcome::Applied {
            txn.commit().await.map_err(|e| {
                error!("Failed to commit transaction: {}", e);
                ServiceError::DatabaseError(e)
            })?;
        } else {
            txn.rollback().await?;
        }
        Ok(outcome)
    }

    #[instrument(skip(self, changes), fields(batch_size = changes.len()))]
    async fn commit_batch(
        &self,
        changes: Vec<DocumentChange>,
    ) -> Result<Vec<Result<CommitOutcome, ServiceError>>, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin batch transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        let mut results = Vec::with_capacity(changes.len());
        for change in &changes {
            let savepoint = txn.begin().await?;
            match apply_change(&savepoint, change).await {
                Ok(CommitOutcome::Applied) => {
                    savepoint.commit().await?;
                    results.push(Ok(CommitOutcome::Applied));
                }
                Ok(other) => {
                    savepoint.rollback().await?;
                    results.push(Ok(other));
                }
                Err(e) => {
                    warn!(
                        external_id = change.external_order_id(),
                        error = %e,
                        "Discarding order writes inside batch"
                    );
                    savepoint.rollback().await?;
                    results.push(Err(e));
                }
            }
        }

        txn.commit().await.map_err(|e| {
            error!("Failed to commit batch transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;
        Ok(results)
    }

    async fn find_customer(&self, key: &CustomerKey) -> Result<Option<Customer>, ServiceError> {
        Ok(customer::Entity::find()
            .filter(customer_key_condition(key))
            .order_by_asc(customer::Column::CreatedAt)
            .one(&*self.db)
            .await?
            .map(customer_from_model))
    }

    async fn find_customers(&self, keys: &[CustomerKey]) -> Result<Vec<Customer>, ServiceError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let condition = keys
            .iter()
            .fold(Condition::any(), |cond, key| cond.add(customer_key_condition(key)));
        Ok(customer::Entity::find()
            .filter(condition)
            .all(&*self.db)
            .await?
            .into_iter()
            .map(customer_from_model)
            .collect())
    }

    async fn insert_customer_if_absent(
        &self,
        customer: Customer,
    ) -> Result<Customer, ServiceError> {
        customer::Entity::insert(customer_to_active(&customer))
            .on_conflict(
                OnConflict::column(customer::Column::MatchKey)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;
        customer::Entity::find()
            .filter(customer::Column::MatchKey.eq(customer.match_key.clone()))
            .one(&*self.db)
            .await?
            .map(customer_from_model)
            .ok_or_else(|| ServiceError::NotFound(format!("customer {}", customer.match_key)))
    }

    async fn update_customer(&self, customer: &Customer) -> Result<(), ServiceError> {
        let mut active = customer_to_active(customer);
        active.match_key = NotSet;
        active.created_at = NotSet;
        customer::Entity::update(active).exec(&*self.db).await?;
        Ok(())
    }

    async fn list_addresses(&self, customer_ids: &[Uuid]) -> Result<Vec<Address>, ServiceError> {
        if customer_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(customer_address::Entity::find()
            .filter(customer_address::Column::CustomerId.is_in(customer_ids.iter().copied()))
            .order_by_asc(customer_address::Column::CreatedAt)
            .all(&*self.db)
            .await?
            .into_iter()
            .map(address_from_model)
            .collect())
    }

    async fn insert_address_if_absent(
        &self,
        address: Address,
    ) -> Result<(Address, bool), ServiceError> {
        let inserted = customer_address::Entity::insert(address_to_active(&address))
            .on_conflict(
                OnConflict::columns([
                    customer_address::Column::CustomerId,
                    customer_address::Column::Fingerprint,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;
        let stored = customer_address::Entity::find()
            .filter(customer_address::Column::CustomerId.eq(address.customer_id))
            .filter(customer_address::Column::Fingerprint.eq(address.fingerprint.clone()))
            .one(&*self.db)
            .await?
            .map(address_from_model)
            .ok_or_else(|| ServiceError::NotFound(format!("address {}", address.fingerprint)))?;
        Ok((stored, inserted > 0))
    }

    async fn set_default_address(
        &self,
        customer_id: Uuid,
        address_id: Uuid,
        kind: AddressKind,
    ) -> Result<(), ServiceError> {
        let owned = customer_address::Entity::find_by_id(address_id)
            .filter(customer_address::Column::CustomerId.eq(customer_id))
            .one(&*self.db)
            .await?;
        if owned.is_none() {
            return Err(ServiceError::NotFound(format!("address {}", address_id)));
        }
        // Single statement: the previous holder is cleared in the same write.
        customer_address::Entity::update_many()
            .col_expr(
                default_flag_column(kind),
                Expr::col(customer_address::Column::Id).eq(address_id),
            )
            .filter(customer_address::Column::CustomerId.eq(customer_id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    async fn claim_default_address(
        &self,
        customer_id: Uuid,
        address_id: Uuid,
        kind: AddressKind,
    ) -> Result<bool, ServiceError> {
        let column = default_flag_column(kind);
        let holder = Query::select()
            .expr(Expr::val(1))
            .from(customer_address::Entity)
            .and_where(Expr::col(customer_address::Column::CustomerId).eq(customer_id))
            .and_where(Expr::col(column).eq(true))
            .to_owned();
        let result = customer_address::Entity::update_many()
            .col_expr(column, Expr::value(true))
            .filter(customer_address::Column::Id.eq(address_id))
            .filter(customer_address::Column::CustomerId.eq(customer_id))
            .filter(Expr::exists(holder).not())
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn list_territories(&self) -> Result<Vec<Territory>, ServiceError> {
        territory::Entity::find()
            .order_by_asc(territory::Column::Code)
            .all(&*self.db)
            .await?
            .into_iter()
            .map(territory_from_model)
            .collect()
    }

    async fn get_territory(&self, code: &str) -> Result<Option<Territory>, ServiceError> {
        territory::Entity::find_by_id(code.to_string())
            .one(&*self.db)
            .await?
            .map(territory_from_model)
            .transpose()
    }

    async fn upsert_territory(&self, territory: Territory) -> Result<(), ServiceError> {
        let active = territory::ActiveModel {
            code: Set(territory.code.clone()),
            labels: Set(serde_json::to_value(&territory.labels)?),
            pricing_profile: Set(territory.pricing_profile.clone()),
            delivery_charge_minor: Set(territory.delivery_charge.map(to_minor).transpose()?),
        };
        territory::Entity::insert(active)
            .on_conflict(
                OnConflict::column(territory::Column::Code)
                    .update_columns([
                        territory::Column::Labels,
                        territory::Column::PricingProfile,
                        territory::Column::DeliveryChargeMinor,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;
        Ok(())
    }

    async fn list_pricing_profiles(&self) -> Result<Vec<PricingProfile>, ServiceError> {
        Ok(pricing_profile::Entity::find()
            .all(&*self.db)
            .await?
            .into_iter()
            .map(profile_from_model)
            .collect())
    }

    async fn get_pricing_profile(
        &self,
        name: &str,
    ) -> Result<Option<PricingProfile>, ServiceError> {
        Ok(pricing_profile::Entity::find_by_id(name.to_string())
            .one(&*self.db)
            .await?
            .map(profile_from_model))
    }

    async fn upsert_pricing_profile(&self, profile: PricingProfile) -> Result<(), ServiceError> {
        let active = pricing_profile::ActiveModel {
            name: Set(profile.name),
            warehouse: Set(profile.warehouse),
            price_list: Set(profile.price_list),
            company: Set(profile.company),
        };
        pricing_profile::Entity::insert(active)
            .on_conflict(
                OnConflict::column(pricing_profile::Column::Name)
                    .update_columns([
                        pricing_profile::Column::Warehouse,
                        pricing_profile::Column::PriceList,
                        pricing_profile::Column::Company,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;
        Ok(())
    }

    async fn settlements_for(
        &self,
        document_id: Uuid,
    ) -> Result<Vec<SettlementRecord>, ServiceError> {
        settlement_record::Entity::find()
            .filter(settlement_record::Column::DocumentId.eq(document_id))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(settlement_from_model)
            .collect()
    }
}
