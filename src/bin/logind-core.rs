use std::env;
use std::rc::Rc;

use getopts::Options;

use logind_core::seat::Seat;
use logind_core::{trace, warn, Config};

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optopt("s", "seat", "seat id to bring up (default seat0)", "SEAT");
    opts.optopt("p", "path", "seat object path", "PATH");
    opts.optflag("h", "help", "print this help menu");

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    if matches.opt_present("h") {
        print_usage(&program, &opts);
        return;
    }

    let seat_id = matches.opt_str("s").unwrap_or_else(|| "seat0".to_string());
    let seat_path = matches.opt_str("p").unwrap_or_else(|| format!("/org/logind/seat/{}", seat_id));

    let config = Rc::new(Config::load());

    let mut seat = match Seat::new(config.clone(), &seat_id, &seat_path) {
        Ok(s) => s,
        Err(e) => {
            warn!("failed to construct seat {}: {}", seat_id, e);
            std::process::exit(1);
        }
    };

    trace!("seat {} ready, starting auto-login", seat_id);
    if let Err(e) = seat.create_session(None, None, None) {
        warn!("initial session on {} failed: {}", seat_id, e);
    }

    run_event_loop(&mut seat);
}

/// Single-threaded cooperative loop: the only fd of interest is the
/// seat's child-death notification pipe.
fn run_event_loop(seat: &mut Seat) {
    loop {
        let mut pfd = libc::pollfd {
            fd: seat.notify_fd(),
            events: libc::POLLIN,
            revents: 0,
        };

        let rc = unsafe { libc::poll(&mut pfd, 1, -1) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            warn!("poll() failed: {}", err);
            continue;
        }

        if pfd.revents & libc::POLLIN != 0 {
            seat.handle_child_death();
        }
    }
}
