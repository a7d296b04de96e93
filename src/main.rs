use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use duel_quiz::{config, db, handlers, state::AppState};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duel_quiz=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db_path = config::load_database_path();
    let pool = db::init_db(&db_path).expect("Failed to initialize database");

    {
        let conn = pool.lock().expect("Database lock failed during startup");
        db::seed_demo_game(&conn).expect("Failed to seed demo game");
    }

    let tuning = config::load_tuning();
    tracing::debug!("Tuning: {:?}", tuning);

    let app = handlers::router(AppState::new(pool, tuning)).layer(TraceLayer::new_for_http());

    let bind_addr = config::server_bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", bind_addr));

    tracing::info!("Server running on http://{}", bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server failed to start");
}
