pub mod location;
pub mod location_stock;
pub mod movement;
pub mod product;
pub mod request;
pub mod request_item;
pub mod stock_reservation;
pub mod user;
