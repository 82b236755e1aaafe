use estoque_core::config::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_target(false).compact().init();

    // Conecta, migra e monta o gráfico de serviços
    let state = match AppState::new().await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("🔥 Falha ao inicializar o motor: {:?}", e);
            std::process::exit(1);
        }
    };

    // Sem superfície HTTP aqui: o motor é consumido como biblioteca.
    // O binário serve de verificação de ambiente (conexão + migrações).
    let pool_size = state.db_pool.size();
    tracing::info!("🚀 Motor pronto (pool com {pool_size} conexões)");
}
