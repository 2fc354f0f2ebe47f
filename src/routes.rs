use crate::{
    api::{locations, time_entries, users, vacation_requests},
    auth::{handlers, middleware::auth_middleware},
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use std::sync::Arc;

/// Per-client-IP limiter allowing `requests_per_min` with an equal burst.
fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
    let requests_per_min = requests_per_min.max(1);
    let cfg = GovernorConfigBuilder::default()
        .milliseconds_per_request((60_000 / requests_per_min as u64).max(1))
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .unwrap_or_default();
    Governor::new(&cfg)
}

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    let login_limiter = Arc::new(build_limiter(config.rate_login_per_min));
    let refresh_limiter = Arc::new(build_limiter(config.rate_refresh_per_min));
    let protected_limiter = Arc::new(build_limiter(config.rate_protected_per_min));

    // Public routes
    cfg.service(
        web::scope("/auth")
            .service(
                web::resource("/login")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::login)),
            )
            .service(
                web::resource("/refresh")
                    .wrap(refresh_limiter.clone())
                    .route(web::post().to(handlers::refresh_token)),
            )
            .service(
                web::resource("/logout")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::logout)),
            ),
    );

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware))
            .wrap(protected_limiter)
            .service(
                web::scope("/locations")
                    // /locations
                    .service(
                        web::resource("")
                            .route(web::get().to(locations::list_locations))
                            .route(web::post().to(locations::create_location)),
                    )
                    // literal segments must come before /{id}
                    .service(
                        web::resource("/nearest").route(web::get().to(locations::nearest_location)),
                    )
                    .service(
                        web::resource("/all").route(web::get().to(locations::list_all_locations)),
                    )
                    // /locations/{id}
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(locations::get_location))
                            .route(web::put().to(locations::update_location))
                            .route(web::delete().to(locations::delete_location)),
                    ),
            )
            .service(
                web::scope("/time-entries")
                    .service(
                        web::resource("/clock-in").route(web::post().to(time_entries::clock_in)),
                    )
                    .service(
                        web::resource("/clock-out").route(web::post().to(time_entries::clock_out)),
                    )
                    .service(
                        web::resource("/my-entries").route(web::get().to(time_entries::my_entries)),
                    )
                    .service(
                        web::resource("/my-active")
                            .route(web::get().to(time_entries::my_active_entry)),
                    )
                    .service(
                        web::resource("/active-employees")
                            .route(web::get().to(time_entries::active_employees)),
                    )
                    // /time-entries/{id}
                    .service(
                        web::resource("/{id}").route(web::put().to(time_entries::update_time_entry)),
                    ),
            )
            .service(
                web::scope("/vacation-requests")
                    // /vacation-requests
                    .service(
                        web::resource("").route(web::post().to(vacation_requests::create_request)),
                    )
                    .service(
                        web::resource("/my-requests")
                            .route(web::get().to(vacation_requests::my_requests)),
                    )
                    .service(
                        web::resource("/pending")
                            .route(web::get().to(vacation_requests::pending_requests)),
                    )
                    // /vacation-requests/{id}
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(vacation_requests::get_request))
                            .route(web::put().to(vacation_requests::update_request))
                            .route(web::delete().to(vacation_requests::cancel_request)),
                    )
                    // /vacation-requests/{id}/approve
                    .service(
                        web::resource("/{id}/approve")
                            .route(web::put().to(vacation_requests::approve_request)),
                    )
                    // /vacation-requests/{id}/reject
                    .service(
                        web::resource("/{id}/reject")
                            .route(web::put().to(vacation_requests::reject_request)),
                    ),
            )
            .service(
                web::scope("/users")
                    // /users
                    .service(
                        web::resource("")
                            .route(web::get().to(users::list_users))
                            .route(web::post().to(users::create_user)),
                    )
                    .service(web::resource("/me").route(web::get().to(users::me)))
                    // /users/{id}
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(users::get_user))
                            .route(web::put().to(users::update_user))
                            .route(web::delete().to(users::delete_user)),
                    ),
            ),
    );
}

// LOGIN
//  ├─ access_token (30 min)
//  └─ refresh_token (7 days)

// API REQUEST
//  └─ Authorization: Bearer access_token

// ACCESS EXPIRED
//  └─ POST /auth/refresh with refresh_token
//       └─ returns a new pair, old refresh token revoked

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn limiter_builds_for_any_rate() {
        // zero and rates above one per millisecond clamp instead of failing
        for rate in [0, 1, 5, 60, 120_000] {
            let _ = build_limiter(rate);
        }
    }
}
