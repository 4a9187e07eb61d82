use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, Func},
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter, QueryOrder, Set,
    SqlErr,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::product::{self, Entity as ProductEntity, Model as ProductModel},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        allocation::{AllocationRequest, AllocationService},
        invalidation::{Invalidation, Mutation, Resource},
        pricing::{format_amount, parse_amount, stored_amount},
    },
};

/// Storefront search filters. Text filters match case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct ProductQuery {
    pub search: Option<String>,
    pub fabric: Option<String>,
    pub occasion: Option<String>,
    pub category: Option<String>,
    pub color: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
}

/// Listing fields for a product about to be created.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub tracking_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub fabric: String,
    pub color: String,
    pub occasion: String,
    pub category: String,
    pub price: String,
    pub image_url: Option<String>,
    pub allocation: AllocationRequest,
}

/// Descriptive edits. Stock and allocation are fixed at creation.
#[derive(Debug, Clone, Default)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub fabric: Option<String>,
    pub color: Option<String>,
    pub occasion: Option<String>,
    pub category: Option<String>,
    pub price: Option<String>,
    pub image_url: Option<String>,
}

impl ProductUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.fabric.is_none()
            && self.color.is_none()
            && self.occasion.is_none()
            && self.category.is_none()
            && self.price.is_none()
            && self.image_url.is_none()
    }
}

/// Catalog reads and seller-side product management.
#[derive(Clone)]
pub struct ProductService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    allocation: AllocationService,
}

impl ProductService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db,
            event_sender,
            allocation: AllocationService::new(),
        }
    }

    /// Product search, newest first.
    ///
    /// The free-text term matches name, description, fabric or tracking id
    /// case-insensitively. Price bounds are inclusive.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<ProductModel>)` - Matching products
    /// * `Err(ServiceError::BadRequest)` - `minPrice` above `maxPrice`
    #[instrument(skip(self))]
    pub async fn search(&self, query: ProductQuery) -> Result<Vec<ProductModel>, ServiceError> {
        if let (Some(min), Some(max)) = (query.min_price, query.max_price) {
            if min > max {
                return Err(ServiceError::BadRequest(
                    "minPrice must not exceed maxPrice".to_string(),
                ));
            }
        }

        let mut condition = Condition::all();
        if let Some(term) = non_blank(query.search.as_deref()) {
            let pattern = format!("%{}%", term.to_lowercase());
            condition = condition.add(
                Condition::any()
                    .add(lower(product::Column::Name).like(pattern.clone()))
                    .add(lower(product::Column::Description).like(pattern.clone()))
                    .add(lower(product::Column::Fabric).like(pattern.clone()))
                    .add(lower(product::Column::TrackingId).like(pattern)),
            );
        }
        for (column, value) in [
            (product::Column::Fabric, &query.fabric),
            (product::Column::Occasion, &query.occasion),
            (product::Column::Category, &query.category),
            (product::Column::Color, &query.color),
        ] {
            if let Some(value) = non_blank(value.as_deref()) {
                condition = condition.add(lower(column).eq(value.to_lowercase()));
            }
        }

        let products = ProductEntity::find()
            .filter(condition)
            .order_by_desc(product::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        // Prices are stored as strings, so range filtering happens after the fetch.
        if query.min_price.is_none() && query.max_price.is_none() {
            return Ok(products);
        }
        let mut matched = Vec::with_capacity(products.len());
        for product in products {
            let price = stored_amount(&product.price)?;
            let above_min = query.min_price.map_or(true, |min| price >= min);
            let below_max = query.max_price.map_or(true, |max| price <= max);
            if above_min && below_max {
                matched.push(product);
            }
        }
        Ok(matched)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<ProductModel, ServiceError> {
        ProductEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))
    }

    /// Looks a product up by the tag printed on its label.
    #[instrument(skip(self))]
    pub async fn get_by_tracking_id(&self, tracking_id: &str) -> Result<ProductModel, ServiceError> {
        ProductEntity::find()
            .filter(product::Column::TrackingId.eq(tracking_id.trim()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product with tracking id {} not found", tracking_id))
            })
    }

    /// Every product, including sold-out and physical-only listings.
    #[instrument(skip(self))]
    pub async fn list_all(&self) -> Result<Vec<ProductModel>, ServiceError> {
        Ok(ProductEntity::find()
            .order_by_desc(product::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Validates the allocation and persists a new product.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create(&self, input: NewProduct) -> Result<Mutation<ProductModel>, ServiceError> {
        let plan = self.allocation.plan(&input.allocation).map_err(|err| {
            warn!(error = %err, "allocation rejected");
            ServiceError::from(err)
        })?;
        let price = parse_amount("price", &input.price)?;

        let tracking_id = match non_blank(input.tracking_id.as_deref()) {
            Some(id) => id.to_string(),
            None => generate_tracking_id(),
        };

        let now = Utc::now();
        let id = Uuid::new_v4();
        let model = product::ActiveModel {
            id: Set(id),
            tracking_id: Set(tracking_id.clone()),
            name: Set(input.name.trim().to_string()),
            description: Set(input.description),
            fabric: Set(input.fabric.trim().to_string()),
            color: Set(input.color.trim().to_string()),
            occasion: Set(input.occasion.trim().to_string()),
            category: Set(input.category.trim().to_string()),
            price: Set(format_amount(price)),
            image_url: Set(input.image_url),
            channel: Set(plan.channel),
            total_stock: Set(plan.total_stock),
            in_stock: Set(plan.online_quantity()),
            store_inventory: Set(plan.store_inventory),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let product = model.insert(&*self.db).await.map_err(|err| {
            if let Some(SqlErr::UniqueConstraintViolation(_)) = err.sql_err() {
                ServiceError::Conflict(format!("Tracking id {} is already in use", tracking_id))
            } else {
                ServiceError::from(err)
            }
        })?;

        self.event_sender.send_or_log(Event::ProductCreated {
            product_id: product.id,
            tracking_id: product.tracking_id.clone(),
        });
        info!(product_id = %product.id, tracking_id = %product.tracking_id, in_stock = product.in_stock, "product created");

        Ok(Mutation::new(product).invalidate(Invalidation::all(Resource::Products)))
    }

    /// Edits descriptive fields. Orders keep their own snapshots and are untouched.
    #[instrument(skip(self, update))]
    pub async fn update_details(
        &self,
        id: Uuid,
        update: ProductUpdate,
    ) -> Result<Mutation<ProductModel>, ServiceError> {
        if update.is_empty() {
            return Err(ServiceError::ValidationError(
                "update must change at least one field".to_string(),
            ));
        }

        let existing = self.get(id).await?;
        let mut model: product::ActiveModel = existing.into();

        if let Some(name) = update.name {
            model.name = Set(required_text("name", &name)?);
        }
        if let Some(description) = update.description {
            model.description = Set(Some(description));
        }
        if let Some(fabric) = update.fabric {
            model.fabric = Set(required_text("fabric", &fabric)?);
        }
        if let Some(color) = update.color {
            model.color = Set(required_text("color", &color)?);
        }
        if let Some(occasion) = update.occasion {
            model.occasion = Set(required_text("occasion", &occasion)?);
        }
        if let Some(category) = update.category {
            model.category = Set(required_text("category", &category)?);
        }
        if let Some(price) = update.price {
            model.price = Set(format_amount(parse_amount("price", &price)?));
        }
        if let Some(image_url) = update.image_url {
            model.image_url = Set(Some(image_url));
        }
        model.updated_at = Set(Utc::now());

        let product = model.update(&*self.db).await?;
        info!(product_id = %id, "product details updated");

        Ok(Mutation::new(product)
            .invalidate(Invalidation::all(Resource::Products))
            .invalidate(Invalidation::keyed(Resource::Product, id)))
    }
}

fn lower(column: product::Column) -> Expr {
    Expr::expr(Func::lower(Expr::col(column)))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn required_text(field: &str, value: &str) -> Result<String, ServiceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::ValidationError(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

/// `SAR-` followed by eight uppercase hex digits.
pub fn generate_tracking_id() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    format!("SAR-{}", simple[..8].to_uppercase())
}
