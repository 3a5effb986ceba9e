use crate::{
    entities::commerce::{
        coupon, coupon_redemption, Coupon, CouponModel, CouponRedemption, DiscountKind,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Why a code did not produce a discount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponRejection {
    Unknown,
    Inactive,
    NotYetValid,
    Expired,
    RedemptionCapReached,
    ItemNotInCart,
    CurrencyMismatch,
}

/// Outcome of evaluating a coupon against a cart. An invalid coupon is a
/// normal outcome with a zero discount, never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponEvaluation {
    pub valid: bool,
    /// Normalized code, when one was supplied
    pub code: Option<String>,
    pub discount_amount: i64,
    pub rejection: Option<CouponRejection>,
}

impl CouponEvaluation {
    fn rejected(code: Option<String>, reason: CouponRejection) -> Self {
        Self {
            valid: false,
            code,
            discount_amount: 0,
            rejection: Some(reason),
        }
    }

    /// Code to record against the purchase, only when a discount applied.
    pub fn applied_code(&self) -> Option<&str> {
        if self.valid {
            self.code.as_deref()
        } else {
            None
        }
    }
}

/// Result of counting a redemption for an authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedemptionOutcome {
    Counted,
    /// This authorization was already counted
    AlreadyCounted,
    /// Ledger row written, counter held at its cap
    CapReached,
    UnknownCoupon,
}

/// Codes are matched case-insensitively and ignore surrounding whitespace.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Discount for `subtotal`, never more than the subtotal and never negative.
///
/// Percentages round down to the minor unit.
pub fn compute_discount(kind: DiscountKind, value: i64, subtotal: i64) -> i64 {
    if subtotal <= 0 || value <= 0 {
        return 0;
    }
    let raw = match kind {
        DiscountKind::Percentage => {
            let pct = i128::from(value.min(100));
            (i128::from(subtotal) * pct / 100) as i64
        }
        DiscountKind::FixedAmount => value,
    };
    raw.min(subtotal)
}

/// Pure validity check of a loaded coupon against a cart.
pub fn check_coupon(
    coupon: &CouponModel,
    subtotal: i64,
    item_ids: &[Uuid],
    currency: &str,
    now: DateTime<Utc>,
) -> CouponEvaluation {
    let code = Some(coupon.code.clone());

    if !coupon.active {
        return CouponEvaluation::rejected(code, CouponRejection::Inactive);
    }
    if coupon.valid_from.map_or(false, |from| now < from) {
        return CouponEvaluation::rejected(code, CouponRejection::NotYetValid);
    }
    if coupon.valid_until.map_or(false, |until| now > until) {
        return CouponEvaluation::rejected(code, CouponRejection::Expired);
    }
    if coupon.cap_reached() {
        return CouponEvaluation::rejected(code, CouponRejection::RedemptionCapReached);
    }
    if let Some(scoped) = coupon.catalog_item_id {
        if !item_ids.contains(&scoped) {
            return CouponEvaluation::rejected(code, CouponRejection::ItemNotInCart);
        }
    }
    if coupon.discount_kind == DiscountKind::FixedAmount {
        if let Some(coupon_currency) = &coupon.currency {
            if !coupon_currency.eq_ignore_ascii_case(currency) {
                return CouponEvaluation::rejected(code, CouponRejection::CurrencyMismatch);
            }
        }
    }

    CouponEvaluation {
        valid: true,
        code,
        discount_amount: compute_discount(coupon.discount_kind, coupon.discount_value, subtotal),
        rejection: None,
    }
}

/// Coupon evaluation and redemption counting.
///
/// `evaluate` has no side effects. The redemption counter only moves through
/// [`CouponService::record_redemption`], once per authorization.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    async fn find_by_code(&self, normalized: &str) -> Result<Option<CouponModel>, ServiceError> {
        Ok(Coupon::find()
            .filter(coupon::Column::Code.eq(normalized))
            .one(&*self.db)
            .await?)
    }

    /// Evaluates `code` against a cart. Only storage failures are errors.
    #[instrument(skip(self, item_ids))]
    pub async fn evaluate(
        &self,
        code: &str,
        subtotal: i64,
        item_ids: &[Uuid],
        currency: &str,
    ) -> Result<CouponEvaluation, ServiceError> {
        let normalized = normalize_code(code);
        if normalized.is_empty() {
            return Ok(CouponEvaluation::rejected(None, CouponRejection::Unknown));
        }

        let evaluation = match self.find_by_code(&normalized).await? {
            Some(coupon) => check_coupon(&coupon, subtotal, item_ids, currency, Utc::now()),
            None => CouponEvaluation::rejected(Some(normalized), CouponRejection::Unknown),
        };

        if let Some(reason) = evaluation.rejection {
            info!(code = ?evaluation.code, ?reason, "Coupon not applied");
        }
        Ok(evaluation)
    }

    /// Counts one redemption of `code` for `authorization_id`.
    ///
    /// The ledger insert and the capped increment share a transaction, so
    /// retries for the same authorization never count twice.
    #[instrument(skip(self))]
    pub async fn record_redemption(
        &self,
        code: &str,
        authorization_id: &str,
    ) -> Result<RedemptionOutcome, ServiceError> {
        let normalized = normalize_code(code);
        let Some(coupon) = self.find_by_code(&normalized).await? else {
            warn!(code = %normalized, "Redeemed coupon no longer exists");
            return Ok(RedemptionOutcome::UnknownCoupon);
        };

        let txn = self.db.begin().await?;

        let ledger_row = coupon_redemption::ActiveModel {
            id: Set(Uuid::new_v4()),
            coupon_id: Set(coupon.id),
            authorization_id: Set(authorization_id.to_string()),
            created_at: Set(Utc::now()),
        };
        let inserted = CouponRedemption::insert(ledger_row)
            .on_conflict(
                OnConflict::column(coupon_redemption::Column::AuthorizationId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await?;

        if inserted == 0 {
            txn.commit().await?;
            return Ok(RedemptionOutcome::AlreadyCounted);
        }

        let updated = Coupon::update_many()
            .col_expr(
                coupon::Column::TimesRedeemed,
                Expr::col(coupon::Column::TimesRedeemed).add(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(coupon::Column::Id.eq(coupon.id))
            .filter(
                Condition::any()
                    .add(coupon::Column::MaxRedemptions.is_null())
                    .add(
                        Expr::col(coupon::Column::TimesRedeemed)
                            .lt(Expr::col(coupon::Column::MaxRedemptions)),
                    ),
            )
            .exec(&txn)
            .await?;

        txn.commit().await?;

        if updated.rows_affected == 0 {
            warn!(
                code = %normalized,
                authorization_id,
                "Coupon redemption cap reached at confirmation; counter not incremented"
            );
            counter!("storefront.coupon.cap_overrun", 1);
            return Ok(RedemptionOutcome::CapReached);
        }

        counter!("storefront.coupon.redeemed", 1);
        self.event_sender
            .send_or_log(Event::CouponRedeemed {
                coupon_id: coupon.id,
                authorization_id: authorization_id.to_string(),
            })
            .await;

        info!(code = %normalized, authorization_id, "Coupon redemption counted");
        Ok(RedemptionOutcome::Counted)
    }
}
