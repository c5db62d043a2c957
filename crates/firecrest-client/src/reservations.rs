//! Reservations microservice.

use firecrest_sched::HttpRequest;
use serde_json::Value;

use crate::client::{Firecrest, take_field};
use crate::error::ClientResult;
use crate::types::Reservation;

impl Firecrest {
    /// Active reservations and their status.
    ///
    /// Calls `GET /reservations`.
    pub async fn all_reservations(&self, machine: &str) -> ClientResult<Vec<Value>> {
        let payload = self
            .call(HttpRequest::get("/reservations").with_machine(machine), 200)
            .await?;
        match take_field(payload, "success")? {
            Value::Array(reservations) => Ok(reservations),
            Value::Null => Ok(Vec::new()),
            other => Ok(vec![other]),
        }
    }

    /// Calls `POST /reservations`.
    pub async fn create_reservation(&self, machine: &str, reservation: &Reservation) -> ClientResult<()> {
        let request = HttpRequest::post("/reservations")
            .with_machine(machine)
            .with_form("reservation", &reservation.name);
        self.call(with_reservation_fields(request, reservation), 201)
            .await?;
        Ok(())
    }

    /// Calls `PUT /reservations/{name}`.
    pub async fn update_reservation(&self, machine: &str, reservation: &Reservation) -> ClientResult<()> {
        let request = HttpRequest::put(format!("/reservations/{}", reservation.name))
            .with_machine(machine);
        self.call(with_reservation_fields(request, reservation), 200)
            .await?;
        Ok(())
    }

    /// Calls `DELETE /reservations/{name}`.
    pub async fn delete_reservation(&self, machine: &str, name: &str) -> ClientResult<()> {
        let request = HttpRequest::delete(format!("/reservations/{name}")).with_machine(machine);
        self.call_optional(request, 204).await?;
        Ok(())
    }
}

fn with_reservation_fields(request: HttpRequest, reservation: &Reservation) -> HttpRequest {
    request
        .with_form("account", &reservation.account)
        .with_form("numberOfNodes", &reservation.number_of_nodes)
        .with_form("nodeType", &reservation.node_type)
        .with_form("starttime", &reservation.start_time)
        .with_form("endtime", &reservation.end_time)
}
