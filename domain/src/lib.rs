use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod error;

pub use error::{ErrorBody, ErrorKind};

/// Tolerance for monetary sum invariants (two fractional digits).
pub fn amounts_match(a: Decimal, b: Decimal) -> bool {
    (a - b).abs() <= Decimal::new(1, 2)
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Salesman,
    AssistantManager,
    Executive,
    Manager,
    Admin,
    SaasAdmin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Salesman => "salesman",
            Role::AssistantManager => "assistant_manager",
            Role::Executive => "executive",
            Role::Manager => "manager",
            Role::Admin => "admin",
            Role::SaasAdmin => "saas_admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "salesman" => Some(Role::Salesman),
            "assistant_manager" => Some(Role::AssistantManager),
            "executive" => Some(Role::Executive),
            "manager" => Some(Role::Manager),
            "admin" => Some(Role::Admin),
            "saas_admin" => Some(Role::SaasAdmin),
            _ => None,
        }
    }

    /// Minimum-role comparison over the fixed ordering
    /// `saas_admin > admin > manager > executive > assistant_manager > salesman`.
    pub fn at_least(self, required: Role) -> bool {
        self >= required
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Role::parse(value).ok_or_else(|| format!("unknown role: {value}"))
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "rejected" => Some(ApprovalStatus::Rejected),
            "expired" => Some(ApprovalStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

/// The entity families that share the approval lifecycle. Used as the cache
/// invalidation key alongside the tenant and as the approval engine's table
/// selector.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    DailyRecord,
    Sale,
    SaleReturn,
    Expense,
    MoneyCollection,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::DailyRecord => "daily_record",
            EntityKind::Sale => "sale",
            EntityKind::SaleReturn => "sale_return",
            EntityKind::Expense => "expense",
            EntityKind::MoneyCollection => "money_collection",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CollectionType {
    DailySales,
    CreditRecovery,
    Other,
}

impl CollectionType {
    pub fn as_str(self) -> &'static str {
        match self {
            CollectionType::DailySales => "daily_sales",
            CollectionType::CreditRecovery => "credit_recovery",
            CollectionType::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "daily_sales" => Some(CollectionType::DailySales),
            "credit_recovery" => Some(CollectionType::CreditRecovery),
            "other" => Some(CollectionType::Other),
            _ => None,
        }
    }
}

/// UI hint derived from the remaining fraction of the collection deadline.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    High,
    Medium,
    Low,
}

impl Urgency {
    /// `remaining / window` at or above 2/3 is low, at or above 1/3 medium,
    /// else high.
    pub fn from_remaining(remaining_secs: i64, window_secs: i64) -> Self {
        if window_secs <= 0 {
            return Urgency::High;
        }
        let remaining = remaining_secs.max(0);
        if remaining * 3 >= window_secs * 2 {
            Urgency::Low
        } else if remaining * 3 >= window_secs {
            Urgency::Medium
        } else {
            Urgency::High
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
    pub subscription_start: Option<DateTime<Utc>>,
    pub subscription_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Shop {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub active: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Category {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Brand {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Product {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub sku: String,
    pub category_id: Option<Uuid>,
    pub brand_id: Option<Uuid>,
    pub unit_price: Decimal,
    pub active: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StockLevel {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub shop_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i64,
    pub updated_at: DateTime<Utc>,
}

/// Payment-method breakdown shared by daily records and sales. Every leg is
/// non-negative and the four legs sum to the declared total within 0.01.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct PaymentBreakdown {
    pub cash: Decimal,
    pub card: Decimal,
    pub upi: Decimal,
    pub credit: Decimal,
}

impl PaymentBreakdown {
    pub fn total(&self) -> Decimal {
        self.cash + self.card + self.upi + self.credit
    }

    pub fn any_negative(&self) -> bool {
        self.cash < Decimal::ZERO
            || self.card < Decimal::ZERO
            || self.upi < Decimal::ZERO
            || self.credit < Decimal::ZERO
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DailySalesItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub total_amount: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DailySalesRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub shop_id: Uuid,
    pub salesman_id: Uuid,
    pub record_date: chrono::NaiveDate,
    pub payments: PaymentBreakdown,
    pub total_sales_amount: Decimal,
    pub status: ApprovalStatus,
    pub created_by: Uuid,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub items: Vec<DailySalesItem>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SaleItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub total_amount: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Sale {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub shop_id: Uuid,
    pub customer_name: Option<String>,
    pub payments: PaymentBreakdown,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub due_amount: Decimal,
    pub status: ApprovalStatus,
    pub created_by: Uuid,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub items: Vec<SaleItem>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SaleReturnItem {
    pub id: Uuid,
    pub sale_item_id: Uuid,
    pub quantity: i64,
    pub refund_amount: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SaleReturn {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub sale_id: Uuid,
    pub reason: Option<String>,
    pub total_refund: Decimal,
    pub status: ApprovalStatus,
    pub created_by: Uuid,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub items: Vec<SaleReturnItem>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MoneyCollection {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub shop_id: Uuid,
    pub originator_id: Uuid,
    pub counterparty_id: Uuid,
    pub amount: Decimal,
    pub collection_type: CollectionType,
    pub submitted_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
    pub status: ApprovalStatus,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BankDeposit {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub collection_id: Uuid,
    pub amount: Decimal,
    pub bank_reference: String,
    pub deposited_by: Uuid,
    pub deposited_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Expense {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub shop_id: Uuid,
    pub description: String,
    pub amount: Decimal,
    pub status: ApprovalStatus,
    pub created_by: Uuid,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionInfo {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub role: Role,
    pub device: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    /// Present on first registration only: creates the tenant and makes this
    /// user its admin, atomically.
    pub tenant_name: Option<String>,
    pub device: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username or email, matched case-insensitively.
    pub login: String,
    pub password: String,
    pub device: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub refresh_token: String,
    pub role: Role,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserProfile {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct CollectionResponse {
    #[serde(flatten)]
    pub collection: MoneyCollection,
    pub time_remaining_seconds: i64,
    pub urgency: Urgency,
}

impl CollectionResponse {
    /// `time_remaining_seconds` is computed at response time, clamped at 0.
    pub fn at(collection: MoneyCollection, now: DateTime<Utc>, window_secs: i64) -> Self {
        let remaining = (collection.deadline_at - now).num_seconds().max(0);
        Self {
            time_remaining_seconds: remaining,
            urgency: Urgency::from_remaining(remaining, window_secs),
            collection,
        }
    }
}
