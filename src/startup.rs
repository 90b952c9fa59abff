use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::RotationProtocol;
use crate::logger::LoggerMiddleware;
use crate::middleware::JwtMiddleware;
use crate::routes::{current_user, health_check, login, logout, refresh, register};
use crate::users::UserDirectory;

pub fn run(
    listener: TcpListener,
    protocol: Arc<RotationProtocol>,
    users: Arc<dyn UserDirectory>,
) -> Result<Server, std::io::Error> {
    let protocol_data = web::Data::from(protocol.clone());
    let users_data: web::Data<dyn UserDirectory> = web::Data::from(users);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(LoggerMiddleware)
            .app_data(protocol_data.clone())
            .app_data(users_data.clone())
            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/auth")
                    .route("/register", web::post().to(register))
                    .route("/login", web::post().to(login))
                    .route("/refresh", web::post().to(refresh))
                    .route("/logout", web::post().to(logout))
                    .service(
                        web::resource("/me")
                            .wrap(JwtMiddleware::new(protocol.clone()))
                            .route(web::get().to(current_user)),
                    ),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
