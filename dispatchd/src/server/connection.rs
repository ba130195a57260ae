// SPDX-License-Identifier: MIT

use log::{debug, warn};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};

use crate::job_pool::Job;

/// One accepted connection, run to completion on a pool worker: greet,
/// echo lines back, close on EOF or `quit`.
pub struct ConnectionJob {
    desc: String,
    stream: TcpStream,
    peer: SocketAddr,
}

impl ConnectionJob {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            desc: format!("serve {peer}"),
            stream,
            peer,
        }
    }

    fn serve(mut self) -> std::io::Result<()> {
        // Accepted sockets inherit the listener's nonblocking flag on some
        // platforms; the worker wants plain blocking reads.
        self.stream.set_nonblocking(false)?;
        self.stream.write_all(b"dispatchd ready\n")?;

        let reader = BufReader::new(self.stream.try_clone()?);
        for line in reader.lines() {
            let line = line?;
            if line.trim() == "quit" {
                break;
            }
            self.stream.write_all(line.as_bytes())?;
            self.stream.write_all(b"\n")?;
        }
        Ok(())
    }
}

impl Job for ConnectionJob {
    fn desc(&self) -> &str {
        &self.desc
    }

    fn run(self: Box<Self>) {
        let peer = self.peer;
        debug!("serving connection from {peer}");
        if let Err(e) = self.serve() {
            warn!("connection from {peer} ended with error: {e}");
        }
    }
}
