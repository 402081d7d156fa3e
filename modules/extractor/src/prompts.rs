//! Embedded prompt templates, one per vendor plus a generic fallback.
//!
//! Each template carries vendor-specific layout and format hints, the
//! statement locale, the shared output schema, and a one-shot example.
//! The template version is attached to the observer trace so extraction
//! regressions can be tied to prompt changes.

use invoice_contracts::VendorType;

/// Schema block shared by every template. Decimals are strings so the
/// model never emits binary-float money.
const SCHEMA_BLOCK: &str = r#"Return ONLY a JSON object with exactly these fields:
{
  "invoice_id": "string, the invoice/statement number, uppercase letters, digits and dashes",
  "vendor_name": "string, the issuing platform's name as printed",
  "vendor_type": "string, one of: ubereats, doordash, grubhub, ifood, rappi, other",
  "invoice_date": "string, the issue date as printed",
  "due_date": "string, the payment due date as printed",
  "currency": "string, 3-letter ISO 4217 code",
  "subtotal": "string decimal, sum of line item amounts before tax",
  "tax_amount": "string decimal",
  "commission_rate": "string decimal between 0 and 1",
  "commission_amount": "string decimal",
  "total_amount": "string decimal, the amount payable",
  "line_items": [
    {
      "description": "string",
      "quantity": "string decimal",
      "unit_price": "string decimal",
      "amount": "string decimal, quantity times unit_price"
    }
  ]
}
Do not wrap the JSON in markdown fences. Do not add commentary."#;

/// A versioned, vendor-specific extraction prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub id: &'static str,
    pub version: &'static str,
    preamble: &'static str,
    example: &'static str,
}

impl PromptTemplate {
    /// Render the full prompt: hints, schema, one-shot example.
    pub fn text(&self) -> String {
        format!(
            "{}\n\n{}\n\nExample output:\n{}",
            self.preamble, SCHEMA_BLOCK, self.example
        )
    }
}

static UBEREATS: PromptTemplate = PromptTemplate {
    id: "ubereats",
    version: "v3",
    preamble: "You are extracting a payment statement issued by Uber Eats to a restaurant \
partner.\nLayout hints: the statement number appears top-right as \"Statement #\"; the \
marketplace fee line is the commission; dates are printed MM/DD/YYYY; amounts use period \
decimals with comma grouping (1,234.56).\nThe commission_rate is the marketplace fee \
percentage divided by 100.",
    example: r#"{"invoice_id":"UE-2026-000123","vendor_name":"Uber Eats","vendor_type":"ubereats","invoice_date":"01/21/2026","due_date":"02/20/2026","currency":"USD","subtotal":"1250.00","tax_amount":"103.13","commission_rate":"0.3000","commission_amount":"375.00","line_items":[{"description":"Order payouts 01/01-01/15","quantity":"125","unit_price":"10.00","amount":"1250.00"}],"total_amount":"978.13"}"#,
};

static DOORDASH: PromptTemplate = PromptTemplate {
    id: "doordash",
    version: "v3",
    preamble: "You are extracting a payment statement issued by DoorDash to a merchant.\n\
Layout hints: the statement id is under the DoorDash wordmark; commission is printed as \
\"Commission (xx%)\"; promotions and error charges appear as separate line items; dates \
are MM/DD/YYYY; amounts use period decimals.",
    example: r#"{"invoice_id":"DD-2026-000777","vendor_name":"DoorDash","vendor_type":"doordash","invoice_date":"03/01/2026","due_date":"03/31/2026","currency":"USD","subtotal":"250.00","tax_amount":"20.00","commission_rate":"0.2000","commission_amount":"50.00","line_items":[{"description":"Delivery orders","quantity":"10","unit_price":"20.00","amount":"200.00"},{"description":"Promotions","quantity":"2","unit_price":"25.00","amount":"50.00"}],"total_amount":"220.00"}"#,
};

static GRUBHUB: PromptTemplate = PromptTemplate {
    id: "grubhub",
    version: "v2",
    preamble: "You are extracting a payment statement issued by Grubhub to a restaurant.\n\
Layout hints: the invoice number follows \"Invoice:\"; marketing and delivery fees are \
separate commission components; report their sum as commission_amount and the blended \
rate as commission_rate; dates are MM/DD/YYYY; amounts use period decimals.",
    example: r#"{"invoice_id":"GH-88104","vendor_name":"Grubhub","vendor_type":"grubhub","invoice_date":"02/10/2026","due_date":"03/12/2026","currency":"USD","subtotal":"640.00","tax_amount":"52.80","commission_rate":"0.2500","commission_amount":"160.00","line_items":[{"description":"Order volume","quantity":"32","unit_price":"20.00","amount":"640.00"}],"total_amount":"532.80"}"#,
};

static IFOOD: PromptTemplate = PromptTemplate {
    id: "ifood",
    version: "v4",
    preamble: "Você está extraindo um repasse do iFood para um restaurante parceiro.\nO \
documento está em português do Brasil. Dicas de layout: o número do documento aparece \
como \"Fatura nº\"; a comissão aparece como \"Taxa iFood\"; datas no formato DD/MM/YYYY; \
valores com vírgula decimal e ponto de milhar (1.234,56). Converta os valores para o \
formato com ponto decimal na saída.\nA moeda é BRL salvo indicação em contrário.",
    example: r#"{"invoice_id":"IF-2026-004455","vendor_name":"iFood","vendor_type":"ifood","invoice_date":"21/01/2026","due_date":"20/02/2026","currency":"BRL","subtotal":"3400.00","tax_amount":"0.00","commission_rate":"0.2300","commission_amount":"782.00","line_items":[{"description":"Pedidos do período","quantity":"170","unit_price":"20.00","amount":"3400.00"}],"total_amount":"2618.00"}"#,
};

static RAPPI: PromptTemplate = PromptTemplate {
    id: "rappi",
    version: "v4",
    preamble: "Estás extrayendo una factura emitida por Rappi a un restaurante aliado.\nEl \
documento está en español. Pistas de formato: el número de factura aparece como \
\"Factura No.\"; la comisión aparece como \"Comisión Rappi\"; fechas en formato \
DD/MM/YYYY; montos con punto de miles y coma decimal o montos enteros en pesos \
(45.000 = cuarenta y cinco mil). Convierte los montos a punto decimal en la salida.\nLa \
moneda es COP salvo que se indique otra.",
    example: r#"{"invoice_id":"RP-2026-010203","vendor_name":"Rappi","vendor_type":"rappi","invoice_date":"21/01/2026","due_date":"05/02/2026","currency":"COP","subtotal":"4500000.00","tax_amount":"855000.00","commission_rate":"0.1800","commission_amount":"810000.00","line_items":[{"description":"Pedidos del periodo","quantity":"450","unit_price":"10000.00","amount":"4500000.00"}],"total_amount":"4545000.00"}"#,
};

static GENERIC: PromptTemplate = PromptTemplate {
    id: "generic",
    version: "v2",
    preamble: "You are extracting a delivery-platform payment statement of unknown \
origin.\nIdentify the issuing platform if possible; otherwise use vendor_type \"other\". \
Dates may be ISO, MM/DD/YYYY or DD/MM/YYYY; amounts may use either decimal convention. \
Normalize amounts to period decimals in the output.",
    example: r#"{"invoice_id":"INV-1001","vendor_name":"Acme Delivery","vendor_type":"other","invoice_date":"2026-01-21","due_date":"2026-02-20","currency":"USD","subtotal":"100.00","tax_amount":"8.00","commission_rate":"0.1000","commission_amount":"10.00","line_items":[{"description":"Orders","quantity":"10","unit_price":"10.00","amount":"100.00"}],"total_amount":"98.00"}"#,
};

/// Fixed vendor → template mapping.
pub fn template_for(vendor: VendorType) -> &'static PromptTemplate {
    match vendor {
        VendorType::Ubereats => &UBEREATS,
        VendorType::Doordash => &DOORDASH,
        VendorType::Grubhub => &GRUBHUB,
        VendorType::Ifood => &IFOOD,
        VendorType::Rappi => &RAPPI,
        VendorType::Other => &GENERIC,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_vendor_has_a_template() {
        for vendor in VendorType::NAMED {
            let template = template_for(vendor);
            assert_eq!(template.id, vendor.as_str());
            assert!(!template.version.is_empty());
        }
        assert_eq!(template_for(VendorType::Other).id, "generic");
    }

    #[test]
    fn templates_embed_schema_and_example() {
        for vendor in [
            VendorType::Ubereats,
            VendorType::Doordash,
            VendorType::Grubhub,
            VendorType::Ifood,
            VendorType::Rappi,
            VendorType::Other,
        ] {
            let text = template_for(vendor).text();
            assert!(text.contains("\"invoice_id\""), "{} lacks schema", vendor);
            assert!(text.contains("line_items"), "{} lacks schema", vendor);
            assert!(text.contains("Example output:"), "{} lacks example", vendor);
        }
    }

    #[test]
    fn locale_templates_speak_the_locale() {
        assert!(template_for(VendorType::Ifood).text().contains("português"));
        assert!(template_for(VendorType::Rappi).text().contains("español"));
    }

    #[test]
    fn mapping_is_deterministic() {
        let a = template_for(VendorType::Ifood);
        let b = template_for(VendorType::Ifood);
        assert_eq!(a.id, b.id);
        assert_eq!(a.version, b.version);
        assert_eq!(a.text(), b.text());
    }
}
