pub mod communication;

use actix_web::web;

pub fn create_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/api/v1/communication").configure(communication::create_routes));
}
