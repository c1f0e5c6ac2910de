use crate::error::ZmqError;

/// Represents a parsed and validated endpoint address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Endpoint {
  Inproc(String), // Store name
}

/// Parses an endpoint string into a structured Endpoint enum.
pub(crate) fn parse_endpoint(endpoint_str: &str) -> Result<Endpoint, ZmqError> {
  let invalid_endpoint_err = || ZmqError::InvalidEndpoint(endpoint_str.to_string());

  let (scheme, address_part) = endpoint_str.split_once("://").ok_or_else(invalid_endpoint_err)?;

  match scheme {
    "inproc" => {
      if address_part.is_empty() || address_part.contains('\0') {
        Err(invalid_endpoint_err())
      } else {
        Ok(Endpoint::Inproc(address_part.to_string()))
      }
    }
    "" => Err(invalid_endpoint_err()),
    // tcp, ipc and friends belong to a native socket library, not the in-process sockets.
    _ => Err(ZmqError::UnsupportedTransport(endpoint_str.to_string())),
  }
}
