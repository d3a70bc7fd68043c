use super::types::{OrderRequest, OrderResponse};

/// Order-submission collaborator used by the executor in live mode.
pub trait UnifiedAdapter: Send {
    fn place_order(&mut self, req: OrderRequest) -> Result<OrderResponse, String>;
}

// Stub implementation to make integration explicit. Acknowledges every
// order without contacting a venue.
pub struct NullAdapter;

impl UnifiedAdapter for NullAdapter {
    fn place_order(&mut self, req: OrderRequest) -> Result<OrderResponse, String> {
        Ok(OrderResponse {
            order_id: format!("stub-{}", req.client_id),
            status: "NEW".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::types::{OrderType, Side};

    #[test]
    fn test_null_adapter_acks() {
        let mut a = NullAdapter;
        let resp = a
            .place_order(OrderRequest {
                symbol: "BTCUSDT".into(),
                side: Side::Buy,
                order_type: OrderType::Market,
                price: None,
                qty: 1.0,
                client_id: "c1".into(),
            })
            .unwrap();
        assert_eq!(resp.order_id, "stub-c1");
        assert_eq!(resp.status, "NEW");
    }
}
