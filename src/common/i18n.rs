// src/common/i18n.rs

use std::collections::HashMap;

const DEFAULT_LANG: &str = "en";

// Catálogos embutidos no binário
const CATALOGS: &[(&str, &str)] = &[
    ("en", include_str!("../../locales/en.json")),
    ("pt", include_str!("../../locales/pt.json")),
];

/// Catálogo de mensagens por idioma. Chaves ausentes caem para o inglês e depois para a própria chave.
#[derive(Debug, Clone, Default)]
pub struct I18nStore {
    messages: HashMap<String, HashMap<String, String>>,
}

impl I18nStore {
    pub fn load() -> Self {
        let mut messages = HashMap::new();
        for (lang, raw) in CATALOGS {
            match serde_json::from_str::<HashMap<String, String>>(raw) {
                Ok(catalog) => {
                    messages.insert(lang.to_string(), catalog);
                }
                Err(e) => tracing::warn!("Catálogo '{}' inválido, ignorado: {}", lang, e),
            }
        }
        Self { messages }
    }

    pub fn translate(&self, lang: &str, key: &str, params: &[(&str, String)]) -> String {
        let template = self
            .lookup(lang, key)
            .or_else(|| self.lookup(DEFAULT_LANG, key))
            .unwrap_or(key);

        params.iter().fold(template.to_string(), |acc, (name, value)| {
            acc.replace(&format!("{{{}}}", name), value)
        })
    }

    fn lookup(&self, lang: &str, key: &str) -> Option<&str> {
        self.messages.get(lang)?.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_english_then_key() {
        let store = I18nStore::load();
        assert_eq!(store.translate("pt", "auth.invalid_token", &[]), "Token de autenticação inválido ou ausente.");
        assert_eq!(store.translate("fr", "auth.invalid_token", &[]), "Invalid or missing authentication token.");
        assert_eq!(store.translate("fr", "does.not.exist", &[]), "does.not.exist");
    }

    #[test]
    fn interpolates_params() {
        let store = I18nStore::load();
        let msg = store.translate("en", "error.forbidden", &[("reason", "manage_products".to_string())]);
        assert!(msg.contains("manage_products"));
    }
}
