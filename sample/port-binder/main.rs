use std::io::Write;
use std::net::TcpListener;

/// Binds 127.0.0.1 on the port given as the first argument (0 picks one),
/// prints the bound port and holds every accepted connection until killed.
pub fn main() {
    let port: u16 = std::env::args()
        .nth(1)
        .map(|v| v.parse().unwrap())
        .unwrap_or(0);

    let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
    let mut stdout = std::io::stdout();
    writeln!(stdout, "{}", listener.local_addr().unwrap().port()).unwrap();
    stdout.flush().unwrap();

    let mut held = Vec::new();
    for stream in listener.incoming().flatten() {
        held.push(stream);
    }
}
