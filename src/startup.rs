use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;

use crate::auth::AuthService;
use crate::logger::RequestLogger;
use crate::middleware::BearerAuth;
use crate::routes::{get_current_user, health_check, login, logout, refresh, register};

/// Build the HTTP server on an already bound listener.
///
/// The `AuthService` is constructed by the caller and shared by every
/// worker; nothing here reads process-wide state.
pub fn run(listener: TcpListener, auth: AuthService) -> Result<Server, std::io::Error> {
    let auth = web::Data::new(auth);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(RequestLogger)
            .app_data(auth.clone())
            .route("/health", web::get().to(health_check))
            .service(
                web::scope("/auth")
                    // Public routes
                    .route("/register", web::post().to(register))
                    .route("/login", web::post().to(login))
                    .route("/refresh-token", web::post().to(refresh))
                    // Protected routes
                    .service(
                        web::resource("/logout")
                            .wrap(BearerAuth::new(auth.clone()))
                            .route(web::post().to(logout)),
                    )
                    .service(
                        web::resource("/me")
                            .wrap(BearerAuth::new(auth.clone()))
                            .route(web::get().to(get_current_user)),
                    ),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
