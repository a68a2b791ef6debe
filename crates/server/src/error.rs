//! Error normalization.
//!
//! Storage and handler errors bubble into the dispatcher, which turns them
//! into the uniform `ErrorMessage` envelope here: declared recoverable
//! failures keep their code, everything else becomes a 500 whose body shows
//! the debug representation only when DEBUG is on. Every failure is logged
//! line by line.

use db::error::DbError;
use db::schema::HandlerError;
use utils::response::ErrorMessage;

pub fn handler_error(err: HandlerError, debug: bool) -> ErrorMessage {
    let code = err.code();
    let message = if code == 500 && debug {
        format!("{err:?}")
    } else {
        err.to_string()
    };
    log_lines(code, &message);
    ErrorMessage::new(message, code)
}

pub fn db_error(err: DbError, debug: bool) -> ErrorMessage {
    handler_error(HandlerError::from(err), debug)
}

fn log_lines(code: u16, message: &str) {
    for line in message.lines() {
        if code >= 500 {
            tracing::error!(code, "{line}");
        } else {
            tracing::warn!(code, "{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_codes_survive() {
        let body = handler_error(
            HandlerError::Message { code: 429, message: "Already requested".into() },
            false,
        );
        assert_eq!((body.code, body.message.as_str()), (429, "Already requested"));
    }

    #[test]
    fn duplicate_key_maps_to_conflict() {
        let body = db_error(DbError::DuplicateKey("/garito/task".into()), false);
        assert_eq!(body.code, 409);
        assert!(body.message.contains("already exists"));
    }

    #[test]
    fn internal_errors_hide_detail_without_debug() {
        let body = handler_error(HandlerError::Internal("kaboom".into()), false);
        assert_eq!((body.code, body.message.as_str()), (500, "kaboom"));

        let body = handler_error(HandlerError::Internal("kaboom".into()), true);
        assert!(body.message.contains("Internal"));
    }
}
