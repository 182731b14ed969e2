use std::collections::HashMap;

/// The complete reverse-proxy label set for one deployment's container:
/// a router+service+middleware triple keyed by `app-{appId}`, fixed
/// load-balancer port
/// 8080, health check on `/`, plus `app.id`/`app.subdomain` metadata.
/// For a `.local`/`.localhost` `base_domain` only the plain HTTP router is
/// emitted; otherwise an HTTP-to-HTTPS redirect router and a `websecure`
/// TLS router using `cert_resolver` are emitted as well.
pub fn proxy_labels(
    app_id: &str,
    subdomain: &str,
    tls_enabled: bool,
    cert_resolver: &str,
) -> HashMap<String, String> {
    let service = format!("app-{app_id}");
    let mut labels = HashMap::new();

    labels.insert("app.id".to_string(), app_id.to_string());
    labels.insert("app.subdomain".to_string(), subdomain.to_string());

    labels.insert("traefik.enable".to_string(), "true".to_string());
    labels.insert(
        format!("traefik.http.services.{service}.loadbalancer.server.port"),
        "8080".to_string(),
    );
    labels.insert(
        format!("traefik.http.services.{service}.loadbalancer.healthcheck.path"),
        "/".to_string(),
    );
    labels.insert(
        format!("traefik.http.services.{service}.loadbalancer.healthcheck.interval"),
        "10s".to_string(),
    );
    labels.insert(
        format!("traefik.http.services.{service}.loadbalancer.healthcheck.timeout"),
        "3s".to_string(),
    );

    let rule = format!("Host(`{subdomain}`)");

    if !tls_enabled {
        let router = format!("{service}");
        labels.insert(format!("traefik.http.routers.{router}.rule"), rule);
        labels.insert(format!("traefik.http.routers.{router}.entrypoints"), "web".to_string());
        labels.insert(format!("traefik.http.routers.{router}.service"), service);
        return labels;
    }

    let redirect_middleware = format!("{service}-redirect");
    labels.insert(
        format!("traefik.http.middlewares.{redirect_middleware}.redirectscheme.scheme"),
        "https".to_string(),
    );

    let http_router = format!("{service}-http");
    labels.insert(format!("traefik.http.routers.{http_router}.rule"), rule.clone());
    labels.insert(format!("traefik.http.routers.{http_router}.entrypoints"), "web".to_string());
    labels.insert(
        format!("traefik.http.routers.{http_router}.middlewares"),
        redirect_middleware,
    );

    let https_router = format!("{service}-https");
    labels.insert(format!("traefik.http.routers.{https_router}.rule"), rule);
    labels.insert(
        format!("traefik.http.routers.{https_router}.entrypoints"),
        "websecure".to_string(),
    );
    labels.insert(format!("traefik.http.routers.{https_router}.tls"), "true".to_string());
    labels.insert(
        format!("traefik.http.routers.{https_router}.tls.certresolver"),
        cert_resolver.to_string(),
    );
    labels.insert(format!("traefik.http.routers.{https_router}.service"), service);

    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_domain_emits_only_plain_http_router() {
        let labels = proxy_labels("01HAPP", "01HAPP.stackyn.local", false, "letsencrypt");
        assert_eq!(labels.get("traefik.http.routers.app-01HAPP.entrypoints").unwrap(), "web");
        assert!(!labels.contains_key("traefik.http.routers.app-01HAPP-https.tls"));
    }

    #[test]
    fn public_domain_emits_redirect_and_tls_router() {
        let labels = proxy_labels("01HAPP", "01HAPP.example.tld", true, "letsencrypt");
        assert_eq!(labels.get("traefik.http.routers.app-01HAPP-https.tls").unwrap(), "true");
        assert_eq!(
            labels.get("traefik.http.routers.app-01HAPP-https.tls.certresolver").unwrap(),
            "letsencrypt"
        );
        assert_eq!(
            labels.get("traefik.http.routers.app-01HAPP-http.middlewares").unwrap(),
            "app-01HAPP-redirect"
        );
    }

    #[test]
    fn service_load_balancer_port_is_always_8080() {
        let labels = proxy_labels("01HAPP", "x.example.tld", true, "letsencrypt");
        assert_eq!(
            labels.get("traefik.http.services.app-01HAPP.loadbalancer.server.port").unwrap(),
            "8080"
        );
    }
}
