// src/services/document_service.rs

use std::{path::Path, sync::Arc};

use genpdf::{elements, style, Element};
use image::Luma;
use qrcode::QrCode;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    authz::{Action, Identity, PolicyEngine, Resource, ResourceKind},
    common::error::AppError,
    db::{InvoiceRepository, OrderRepository, TenantRepository},
    models::{invoices::Invoice, orders::OrderItem, tenancy::Store},
};

const FONT_FAMILY: &str = "Roboto";

/// Tudo que vai impresso na fatura, já carregado do banco.
#[derive(Debug, Clone)]
pub struct InvoicePrint {
    pub invoice: Invoice,
    pub store: Store,
    pub chain_name: String,
    pub items: Vec<OrderItem>,
}

#[derive(Clone)]
pub struct DocumentService {
    invoice_repo: InvoiceRepository,
    order_repo: OrderRepository,
    tenant_repo: TenantRepository,
    policy: Arc<PolicyEngine>,
    fonts_dir: String,
}

impl DocumentService {
    pub fn new(
        invoice_repo: InvoiceRepository,
        order_repo: OrderRepository,
        tenant_repo: TenantRepository,
        policy: Arc<PolicyEngine>,
        fonts_dir: String,
    ) -> Self {
        Self { invoice_repo, order_repo, tenant_repo, policy, fonts_dir }
    }

    pub async fn invoice_pdf(&self, identity: &Identity, invoice_id: Uuid) -> Result<(String, Vec<u8>), AppError> {
        // 1. Busca os Dados
        let invoice = self
            .invoice_repo
            .find_invoice(invoice_id)
            .await?
            .ok_or(AppError::NotFound("invoice"))?;
        self.policy.authorize(
            identity,
            &Resource::row(ResourceKind::Invoice, Some(invoice.chain_id), Some(invoice.store_id)),
            Action::Read,
        )?;

        let store = self
            .tenant_repo
            .find_store(invoice.store_id)
            .await?
            .ok_or(AppError::NotFound("store"))?;
        let chain_name = self
            .tenant_repo
            .find_chain(invoice.chain_id)
            .await?
            .map(|c| c.name)
            .unwrap_or_default();

        let order_ids = self.order_repo.order_ids_for_invoice(invoice.id).await?;
        let items = if order_ids.is_empty() {
            Vec::new()
        } else {
            self.order_repo.items_for_orders(&order_ids).await?
        };

        let file_name = format!("{}.pdf", invoice.invoice_number);
        let print = InvoicePrint { invoice, store, chain_name, items };

        // 2. Renderiza fora do runtime (fontes e imagem são trabalho de CPU)
        let fonts_dir = self.fonts_dir.clone();
        let bytes = tokio::task::spawn_blocking(move || render_invoice(Path::new(&fonts_dir), &print))
            .await
            .map_err(|e| AppError::InternalServerError(e.into()))??;

        Ok((file_name, bytes))
    }
}

fn pdf_error(e: impl std::fmt::Display) -> AppError {
    AppError::InternalServerError(anyhow::Error::msg(e.to_string()))
}

fn money(value: Decimal) -> String {
    format!("{:.2}", value)
}

pub fn render_invoice(fonts_dir: &Path, print: &InvoicePrint) -> Result<Vec<u8>, AppError> {
    // Carrega a fonte da pasta configurada
    let font_family = genpdf::fonts::from_files(fonts_dir, FONT_FAMILY, None).map_err(|e| {
        tracing::error!(dir = %fonts_dir.display(), "Fonte {} não encontrada: {}", FONT_FAMILY, e);
        AppError::FontNotFound(fonts_dir.display().to_string())
    })?;

    let invoice = &print.invoice;
    let mut doc = genpdf::Document::new(font_family);
    doc.set_title(format!("Fatura {}", invoice.invoice_number));
    let mut decorator = genpdf::SimplePageDecorator::new();
    decorator.set_margins(10);
    doc.set_page_decorator(decorator);

    // --- CABEÇALHO ---
    if !print.chain_name.is_empty() {
        doc.push(elements::Paragraph::new(print.chain_name.as_str()).styled(style::Style::new().bold().with_font_size(18)));
    }
    doc.push(elements::Paragraph::new(print.store.name.as_str()).styled(style::Style::new().bold().with_font_size(14)));
    if let Some(address) = &print.store.address {
        doc.push(elements::Paragraph::new(address.as_str()).styled(style::Style::new().with_font_size(9)));
    }
    if let Some(phone) = &print.store.phone {
        doc.push(elements::Paragraph::new(format!("Tel: {phone}")).styled(style::Style::new().with_font_size(9)));
    }

    doc.push(elements::Break::new(1.5));
    doc.push(
        elements::Paragraph::new(format!("FATURA {}", invoice.invoice_number))
            .styled(style::Style::new().bold().with_font_size(14)),
    );
    doc.push(elements::Paragraph::new(format!("Data: {}", invoice.created_at.format("%d/%m/%Y %H:%M"))));
    doc.push(elements::Paragraph::new(format!("Pagamento: {:?}", invoice.payment_method)));
    doc.push(elements::Break::new(2));

    // --- TABELA DE ITENS ---
    // Pesos das colunas: Nome (4), Qtd (1), Unitário (2), Total (2)
    let mut table = elements::TableLayout::new(vec![4, 1, 2, 2]);
    table.set_cell_decorator(elements::FrameCellDecorator::new(true, true, false));

    let bold = style::Style::new().bold();
    table
        .row()
        .element(elements::Paragraph::new("Produto").styled(bold))
        .element(elements::Paragraph::new("Qtd").styled(bold))
        .element(elements::Paragraph::new("Unitário").styled(bold))
        .element(elements::Paragraph::new("Total").styled(bold))
        .push()
        .map_err(pdf_error)?;

    for item in &print.items {
        table
            .row()
            .element(elements::Paragraph::new(item.product_name.as_str()))
            .element(elements::Paragraph::new(item.quantity.to_string()))
            .element(elements::Paragraph::new(money(item.unit_price + item.modifiers_total)))
            .element(elements::Paragraph::new(money(item.line_total)))
            .push()
            .map_err(pdf_error)?;
    }

    doc.push(table);
    doc.push(elements::Break::new(2));

    // --- TOTAIS ---
    let lines = [
        ("Subtotal", invoice.subtotal),
        ("Desconto", invoice.discount),
        ("Imposto", invoice.tax_amount),
    ];
    for (label, value) in lines {
        let mut paragraph = elements::Paragraph::new(format!("{label}: {}", money(value)));
        paragraph.set_alignment(genpdf::Alignment::Right);
        doc.push(paragraph);
    }
    let mut total = elements::Paragraph::new(format!("TOTAL: {}", money(invoice.total)));
    total.set_alignment(genpdf::Alignment::Right);
    doc.push(total.styled(style::Style::new().bold().with_font_size(12)));

    doc.push(elements::Break::new(2));

    // --- QR CODE com o número da fatura ---
    let code = QrCode::new(invoice.invoice_number.as_bytes()).map_err(pdf_error)?;
    let image_buffer = code.render::<Luma<u8>>().build();
    let pdf_image = elements::Image::from_dynamic_image(image::DynamicImage::ImageLuma8(image_buffer))
        .map_err(pdf_error)?
        .with_scale(genpdf::Scale::new(0.5, 0.5));
    doc.push(pdf_image);

    // 3. Renderiza para Buffer (Memória)
    let mut buffer = Vec::new();
    doc.render(&mut buffer).map_err(pdf_error)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::invoices::PaymentMethod;
    use chrono::Utc;

    fn print() -> InvoicePrint {
        let (chain_id, store_id) = (Uuid::new_v4(), Uuid::new_v4());
        InvoicePrint {
            invoice: Invoice {
                id: Uuid::new_v4(),
                chain_id,
                store_id,
                table_id: None,
                invoice_number: "INV-20250114-0001".into(),
                subtotal: Decimal::from(10),
                discount: Decimal::ZERO,
                tax_rate: Decimal::ZERO,
                tax_amount: Decimal::ZERO,
                total: Decimal::from(10),
                payment_method: PaymentMethod::Cash,
                created_by: None,
                created_at: Utc::now(),
            },
            store: Store {
                id: store_id,
                chain_id,
                code: "CENTRO".into(),
                name: "Loja Centro".into(),
                address: None,
                phone: None,
                is_active: true,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            chain_name: "Burger Co.".into(),
            items: Vec::new(),
        }
    }

    #[test]
    fn missing_fonts_are_reported() {
        let dir = std::env::temp_dir().join(format!("no-fonts-{}", Uuid::new_v4()));
        let err = render_invoice(&dir, &print()).unwrap_err();
        assert!(matches!(err, AppError::FontNotFound(_)));
    }

    #[test]
    fn formats_money_with_two_decimals() {
        assert_eq!(money(Decimal::new(1990, 2)), "19.90");
        assert_eq!(money(Decimal::from(5)), "5.00");
    }
}
