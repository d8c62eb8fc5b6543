use actix_web::error::ResponseError;
use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use snafu::Snafu;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility = "pub")]
pub enum Error {
    #[snafu(display("invalid request: {}", reason))]
    Validation { reason: String },

    #[snafu(display("unable to build kubernetes client: '{}'", source))]
    ClientCreate { source: models::error::KubeError },

    #[snafu(display("error running HTTP server: '{}'", source))]
    HttpServer { source: std::io::Error },
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::ClientCreate { .. } | Error::HttpServer { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).body(self.to_string())
    }
}
