use micro_evhttp::handler::Handler;
use micro_evhttp::protocol::ProtocolError;
use micro_evhttp::{Exchange, Server, ServerConfig};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

const BODY: &str = "Hello World!\r\n";

fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut server = match Server::new(ServerConfig::default(), HelloHandler::default()) {
        Ok(server) => server,
        Err(e) => {
            error!(cause = %e, "create server error");
            return;
        }
    };

    info!(port = 8080, "start listening");
    if let Err(e) = server.listen_on_port(8080) {
        error!(cause = %e, "bind server error");
        return;
    }

    if let Err(e) = server.run() {
        error!(cause = %e, "event loop failed");
    }
}

#[derive(Debug, Default)]
struct HelloHandler {
    served: u64,
}

impl HelloHandler {
    fn respond(exchange: &mut Exchange<'_>, keep_alive: bool) -> Result<(), ProtocolError> {
        exchange.write_status(200, "OK")?;
        exchange.write_header("Content-Type", "text/plain")?;
        exchange.write_header("Content-Length", &BODY.len().to_string())?;
        if keep_alive {
            exchange.write_header("Connection", "Keep-Alive")?;
        }
        exchange.write_body(BODY.as_bytes())?;
        exchange.release()
    }
}

impl Handler for HelloHandler {
    fn call(&mut self, exchange: &mut Exchange<'_>) {
        let request = exchange.request();
        let keep_alive = request.header("connection").is_some_and(|value| value.eq_ignore_ascii_case(b"keep-alive"));

        self.served += 1;
        info!(served = self.served, peer = ?exchange.peer_addr(), "request path {}", request.path().unwrap_or("/"));

        if let Err(e) = Self::respond(exchange, keep_alive) {
            error!(cause = %e, "failed to write response");
        }
    }
}
