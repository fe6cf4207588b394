//! Point-of-sale backend library
//!
//! This crate provides the order, inventory, and refund core of a POS
//! backend: order creation against a product catalog with atomic stock
//! reservation, payment settlement, and whole-order refunds. The HTTP
//! transport, auth, and API documentation layers are external collaborators;
//! they consume the services and the error-to-status mapping exposed here.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod logging;
pub mod migrator;
pub mod services;

use crate::db::DbPool;
use crate::events::EventSender;
use std::sync::Arc;

/// Composition root: every service wired against one pool and one event
/// channel, with no ambient singletons.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: config::AppConfig,
    pub event_sender: Arc<EventSender>,
    pub orders: services::orders::OrderService,
    pub refunds: services::refunds::RefundService,
    pub inventory: services::inventory::InventoryService,
}

impl AppState {
    pub fn new(db: Arc<DbPool>, config: config::AppConfig, event_sender: EventSender) -> Self {
        let event_sender = Arc::new(event_sender);
        Self {
            orders: services::orders::OrderService::new(db.clone(), Some(event_sender.clone())),
            refunds: services::refunds::RefundService::new(db.clone(), Some(event_sender.clone())),
            inventory: services::inventory::InventoryService::new(db.clone()),
            db,
            config,
            event_sender,
        }
    }
}
