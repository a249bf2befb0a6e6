//! Built-in prompts and few-shot examples.

use crate::core::data::{ExampleData, Extraction};

pub const COMPANY_PROMPT: &str = "\
从给定的文本中提取公司、产品和关系信息。

为每个实体提供有意义的属性，以增加上下文和深度。

重要提示：
1. 使用输入中的精确文本进行提取
2. 按出现顺序提取实体，没有重叠的文本跨度
3. 确保JSON格式完全正确，包含所有必要的逗号、引号和闭合括号
4. 所有中文字符都要用英文双引号包围（使用 \" 而不是 \u{201c}）
5. 每个属性值都要用英文双引号包围
6. 确保JSON结构完整，不要截断
7. 使用英文键名（company, product）而不是中文
8. 特别注意：文本中的中文引号要转换为英文引号
9. 避免引号嵌套问题，确保每个字符串都正确闭合
";

pub const COMPANY_FALLBACK_PROMPT: &str = r#"从文本中提取公司信息，按以下JSON格式输出：
{
  "extractions": [
    {
      "company": "公司名称",
      "company_attributes": {
        "name": "公司名称",
        "industry": "行业"
      }
    }
  ]
}"#;

pub const LITERARY_PROMPT: &str = "\
Extract characters, emotions, and relationships from the given text.

Provide meaningful attributes for every entity to add context and depth.

Important: Use exact text from the input for extraction_text. Do not paraphrase.
Extract entities in order of appearance with no overlapping text spans.

Note: In play scripts, speaker names appear in ALL-CAPS followed by a period.";

pub const QUICKSTART_PROMPT: &str =
    "提取出公司、产品的名称、用途、技术参数、使用方法、特点、优势等对公司和产品进行介绍的信息。";

const COMPANY_NAME: &str = "山西晋控装备创力智能制造有限公司";
const PRODUCT_NAME: &str = "FHDA1.6/31.5X电磁先导阀";

pub fn company_example() -> ExampleData {
    let text = "\
创力（山西晋控装备创力智能制造有限公司介绍）成立于2021年9月30日，注册地位于长治市经济技术开发区，注册资本10000万元。\
公司在煤矿机械领域积极探索智能化、绿色化转型，致力于推动煤机装备升级和制造模式创新。\
公司以打造高端智能开采控制技术装备产品为主，研发、制造综采工作面液压支架电液控系统、智能化控制系统、集中供液系统、高端智能乳化液泵站，高端智能喷雾泵站。
FHDA1.6/31.5X电磁先导阀
本电磁先导阀是由两组电磁铁驱动的二位三通换向阀组成的。本阀具有体积小、性能可靠、能耗低、维修方便等优点，本阀可单独使用或和电液控换向阀配套使用。
结构:卧式
公称压力:31.5MPa
公称通径:1.6mm
额定工作电压: DC12V
工作电流:≤120mA
电器接头:M12(圆头)
外形尺寸:155mm×84mm×40mm
特点：结构简单、可靠、可维护性强， 可自动控制或手动控制。
";

    ExampleData::new(
        text,
        vec![
            Extraction::new("company", COMPANY_NAME).with_attributes([
                ("genre", "工业行业实操培训的科技公司"),
                ("establishment_date", "2021年9月30日"),
                ("location", "长治市经济技术开发区"),
                ("capital", "10000万元"),
                ("industry", "煤矿机械"),
                ("development_direction", "智能化、绿色化转型，推动煤机装备升级和制造模式创新"),
                (
                    "main_business",
                    "研发、制造综采工作面液压支架电液控系统、智能化控制系统、集中供液系统、高端智能乳化液泵站、高端智能喷雾泵站",
                ),
            ]),
            Extraction::new("product", PRODUCT_NAME).with_attributes([
                ("product_name", PRODUCT_NAME),
                ("composition", "由两组电磁铁驱动的二位三通换向阀组成"),
                ("structure", "卧式"),
                ("nominal_pressure", "31.5MPa"),
                ("nominal_diameter", "1.6mm"),
                ("rated_working_voltage", "DC12V"),
                ("working_current", "≤120mA"),
                ("electrical_connector", "M12(圆头)"),
                ("overall_dimensions", "155mm×84mm×40mm"),
                ("advantages", "体积小、性能可靠、能耗低、维修方便"),
                ("features", "结构简单、可靠、可维护性强，可自动控制或手动控制"),
                ("application", "可单独使用或和电液控换向阀配套使用"),
            ]),
            Extraction::new("relationship", format!("{}制造{}", COMPANY_NAME, PRODUCT_NAME))
                .with_attributes([
                    ("type", "制造"),
                    ("company", COMPANY_NAME),
                    ("product", PRODUCT_NAME),
                ]),
        ],
    )
}

/// A product sheet of spec lines, one entity for the whole sheet.
pub fn keyboard_product_example() -> ExampleData {
    let text = "\
FHJ12矿用本安型键盘为矿用本安型，适用于煤矿井下，通过按键输入指令并发送给控制器执行相应功能，能让工作人员在安全区域控制和操作控制器。
工作电压：DC12V
工作电流：≤50mA
传输方式：RS485
传输速率：115.2Kbps
最大传输距离：10m
防爆标志：Exib I Mb
外形尺寸：185mmX82mmX30mm
";

    ExampleData::new(
        text,
        vec![Extraction::new("product", "FHJ12矿用本安型键盘").with_attributes([
            ("product_name", "FHJ12矿用本安型键盘"),
            ("type", "矿用本安型"),
            ("usage", "通过按键输入指令并发送给控制器执行相应功能，能让工作人员在安全区域控制和操作控制器"),
            ("working_voltage", "DC12V"),
            ("working_current", "≤50mA"),
            ("transmission_method", "RS485"),
            ("transmission_rate", "115.2Kbps"),
            ("max_transmission_distance", "10m"),
            ("explosion_proof_mark", "Exib I Mb"),
            ("dimensions", "185mmX82mmX30mm"),
        ])],
    )
}

/// Several relationships pulled out of a single sentence.
pub fn relationship_example() -> ExampleData {
    const COMPANY: &str = "山西云晟科技有限公司";
    let text = "山西云晟科技有限公司成立于2015年，坐落于有太行明珠之称的山西省晋城市，\
并先后在武汉市、西安市、长治市、临汾市、阳泉市成立子分公司。公司注册资金1000万。";

    let relationship = |text: &str, kind: &str, target: &str| {
        Extraction::new("relationship", text).with_attributes([
            ("type", kind),
            ("entity_1", COMPANY),
            ("entity_2", target),
        ])
    };

    ExampleData::new(
        text,
        vec![
            relationship("山西云晟科技有限公司成立于2015年", "成立时间", "2015年"),
            relationship("坐落于有太行明珠之称的山西省晋城市", "成立地点", "山西省晋城市"),
            relationship(
                "并先后在武汉市、西安市、长治市、临汾市、阳泉市成立子分公司。",
                "分公司地点",
                "武汉市、西安市、长治市、临汾市、阳泉市",
            ),
            relationship("公司注册资金1000万。", "注册资金", "1000万"),
        ],
    )
}

pub fn literary_example() -> ExampleData {
    ExampleData::new(
        "ROMEO. But soft! What light through yonder window breaks?\n\
         It is the east, and Juliet is the sun.\n\
         JULIET. O Romeo, Romeo! Wherefore art thou Romeo?",
        vec![
            Extraction::new("character", "ROMEO").with_attribute("emotional_state", "wonder"),
            Extraction::new("emotion", "But soft!")
                .with_attributes([("feeling", "gentle awe"), ("character", "Romeo")]),
            Extraction::new("relationship", "Juliet is the sun").with_attributes([
                ("type", "metaphor"),
                ("character_1", "Romeo"),
                ("character_2", "Juliet"),
            ]),
            Extraction::new("character", "JULIET").with_attribute("emotional_state", "yearning"),
            Extraction::new("emotion", "Wherefore art thou Romeo?")
                .with_attributes([("feeling", "longing question"), ("character", "Juliet")]),
        ],
    )
}

pub fn quickstart_example() -> ExampleData {
    let text = "山西云晟科技有限公司成立于2015年，坐落于有太行明珠之称的山西省晋城市，\
并先后在武汉市、西安市、长治市、临汾市、阳泉市成立子分公司。公司注册资金1000万。\
云晟科技是国内解决工业行业实操培训的科技公司。\
公司致力于将AI+XR(VR、MR、APP等)高尖端技术应用于安全教育与培训领域，帮助企业和个人更高效、安全、真实的体验、学习。";

    ExampleData::new(
        text,
        vec![Extraction::new("公司介绍", text).with_attributes([
            ("name", "山西云晟科技有限公司"),
            ("genre", "云晟科技是国内解决工业行业实操培训的科技公司"),
        ])],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_extractions_appear_in_their_text() {
        let all = [
            company_example(),
            keyboard_product_example(),
            relationship_example(),
            literary_example(),
            quickstart_example(),
        ];
        for example in all {
            for extraction in &example.extractions {
                // Company relationships name both ends rather than quoting the text.
                if extraction.attributes.contains_key("company") && extraction.extraction_class == "relationship" {
                    continue;
                }
                assert!(
                    example.text.contains(&extraction.extraction_text),
                    "'{}' not found in example text",
                    extraction.extraction_text
                );
            }
        }
    }

    #[test]
    fn test_relationship_example_has_one_sentence_many_entities() {
        let example = relationship_example();
        assert_eq!(example.extractions.len(), 4);
        assert!(example
            .extractions
            .iter()
            .all(|e| e.attributes.get("entity_1").and_then(|v| v.as_str()) == Some("山西云晟科技有限公司")));
    }
}
